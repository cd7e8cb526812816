use facereg_vision::Descriptor;
use serde::Serialize;

/// A registered face: a display name and the descriptor captured for it.
///
/// Names are not unique; registering the same name twice keeps both entries.
/// Only ever written directly; loading goes through the store, which
/// enforces the collection invariants.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identity {
    pub name: String,
    pub descriptor: Descriptor,
}

impl Identity {
    pub fn new(name: impl Into<String>, values: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            descriptor: Descriptor::new(values),
        }
    }
}

/// Normalize a user-supplied name, rejecting blank input.
pub fn normalize_name(raw: &str) -> Option<&str> {
    let name = raw.trim();
    (!name.is_empty()).then_some(name)
}

/// Common descriptor length of `identities`, or a description of the first
/// entry that breaks the collection invariants.
pub fn check_collection(identities: &[Identity]) -> Result<Option<usize>, String> {
    let mut dim = None;
    for (i, identity) in identities.iter().enumerate() {
        if normalize_name(&identity.name).is_none() {
            return Err(format!("entry {i} has an empty name"));
        }
        let len = identity.descriptor.len();
        if len == 0 {
            return Err(format!("entry {i} ({}) has an empty descriptor", identity.name));
        }
        if !identity.descriptor.is_finite() {
            return Err(format!("entry {i} ({}) has non-finite values", identity.name));
        }
        match dim {
            None => dim = Some(len),
            Some(d) if d != len => {
                return Err(format!(
                    "entry {i} ({}) has {len} dimensions, expected {d}",
                    identity.name
                ))
            }
            Some(_) => {}
        }
    }
    Ok(dim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Alice "), Some("Alice"));
        assert_eq!(normalize_name(""), None);
        assert_eq!(normalize_name(" \t\n"), None);
    }

    #[test]
    fn test_check_collection() {
        assert_eq!(check_collection(&[]), Ok(None));

        let ok = vec![
            Identity::new("Alice", vec![1.0, 0.0, 0.0]),
            Identity::new("Alice", vec![0.9, 0.1, 0.0]),
        ];
        assert_eq!(check_collection(&ok), Ok(Some(3)));

        let mixed = vec![
            Identity::new("Alice", vec![1.0, 0.0, 0.0]),
            Identity::new("Bob", vec![0.0, 1.0]),
        ];
        assert!(check_collection(&mixed).unwrap_err().contains("Bob"));

        let blank = vec![Identity::new(" ", vec![1.0])];
        assert!(check_collection(&blank).is_err());

        let infinite = vec![Identity::new("Eve", vec![f32::INFINITY, 0.0])];
        assert!(check_collection(&infinite).unwrap_err().contains("non-finite"));
    }
}
