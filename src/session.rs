//! Registration and lookup workflow.
//!
//! A session owns the frame source, the extractor and the identity store, and
//! runs at most one capture at a time. Requests arriving while a capture is in
//! flight are rejected with [`SessionError::Busy`] rather than queued.

use std::sync::{Mutex, MutexGuard};

use facereg_vision::{Descriptor, DescriptorExtractor, FrameSource};
use thiserror::Error;

use crate::config::CorruptPolicy;
use crate::identity::{normalize_name, Identity};
use crate::matcher::{self, MatchOutcome};
use crate::storage::{IdentityStore, Storage, StoreError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a name is required to register a face")]
    EmptyName,
    #[error("no face detected")]
    NoFaceDetected,
    #[error("another operation is in progress")]
    Busy,
    #[error("camera unavailable: {0:#}")]
    CameraUnavailable(anyhow::Error),
    #[error("descriptor extraction failed: {0:#}")]
    Extraction(anyhow::Error),
    #[error("descriptor has {actual} dimensions, stored identities have {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Registering,
    Matching,
}

/// Outcome of the most recent lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum LastResult {
    Matched { name: String, distance: f32 },
    NoMatch,
}

/// Point-in-time view of the session for display.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub name_input: String,
    pub last_result: Option<LastResult>,
    pub last_error: Option<String>,
    pub identity_count: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub threshold: f32,
    pub on_corrupt: CorruptPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            threshold: matcher::DEFAULT_THRESHOLD,
            on_corrupt: CorruptPolicy::Reset,
        }
    }
}

struct State {
    phase: Phase,
    name_input: String,
    identities: Vec<Identity>,
    last_result: Option<LastResult>,
    last_error: Option<String>,
}

struct Capture<E, F> {
    extractor: E,
    frames: F,
}

pub struct Session<S, E, F> {
    state: Mutex<State>,
    store: Mutex<IdentityStore<S>>,
    capture: Mutex<Capture<E, F>>,
    options: SessionOptions,
}

/// Puts the session back to idle however the operation ends.
struct PhaseGuard<'a> {
    state: &'a Mutex<State>,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        lock(self.state).phase = Phase::Idle;
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<S, E, F> Session<S, E, F>
where
    S: Storage,
    E: DescriptorExtractor,
    F: FrameSource,
{
    /// Load the stored identities and take ownership of the capture pipeline.
    pub fn start(
        mut store: IdentityStore<S>,
        extractor: E,
        frames: F,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let identities = store.load_or_reset(options.on_corrupt)?;
        log::info!("session started with {} stored identities", identities.len());
        Ok(Self {
            state: Mutex::new(State {
                phase: Phase::Idle,
                name_input: String::new(),
                identities,
                last_result: None,
                last_error: None,
            }),
            store: Mutex::new(store),
            capture: Mutex::new(Capture { extractor, frames }),
            options,
        })
    }

    pub fn set_name_input(&self, name: impl Into<String>) {
        lock(&self.state).name_input = name.into();
    }

    pub fn phase(&self) -> Phase {
        lock(&self.state).phase
    }

    pub fn is_busy(&self) -> bool {
        self.phase() != Phase::Idle
    }

    pub fn identities(&self) -> Vec<Identity> {
        lock(&self.state).identities.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let st = lock(&self.state);
        SessionSnapshot {
            phase: st.phase,
            name_input: st.name_input.clone(),
            last_result: st.last_result.clone(),
            last_error: st.last_error.clone(),
            identity_count: st.identities.len(),
        }
    }

    /// Capture one frame and store its descriptor under the current name input.
    pub fn register(&self) -> Result<Identity, SessionError> {
        let name = {
            let mut st = lock(&self.state);
            if st.phase != Phase::Idle {
                return Err(SessionError::Busy);
            }
            let Some(name) = normalize_name(&st.name_input).map(str::to_string) else {
                st.last_error = Some(SessionError::EmptyName.to_string());
                return Err(SessionError::EmptyName);
            };
            st.last_error = None;
            st.phase = Phase::Registering;
            name
        };
        let _guard = PhaseGuard { state: &self.state };

        let result = self.register_inner(name);
        if let Err(e) = &result {
            log::warn!("registration failed: {}", e);
            lock(&self.state).last_error = Some(e.to_string());
        }
        result
    }

    fn register_inner(&self, name: String) -> Result<Identity, SessionError> {
        let descriptor = self.capture_descriptor()?.ok_or(SessionError::NoFaceDetected)?;

        let mut store = lock(&self.store);
        let mut identities = store.load_or_reset(self.options.on_corrupt)?;
        if let Some(existing) = identities.first() {
            if existing.descriptor.len() != descriptor.len() {
                return Err(SessionError::DimensionMismatch {
                    expected: existing.descriptor.len(),
                    actual: descriptor.len(),
                });
            }
        }
        let identity = Identity { name, descriptor };
        identities.push(identity.clone());
        store.save(&identities)?;
        drop(store);

        log::info!(
            "registered {} ({} identities stored)",
            identity.name,
            identities.len()
        );
        let mut st = lock(&self.state);
        st.identities = identities;
        st.name_input.clear();
        Ok(identity)
    }

    /// Capture one frame and look it up among the stored identities.
    ///
    /// Returns `Ok(None)` without capturing when nothing is registered.
    pub fn find(&self) -> Result<Option<LastResult>, SessionError> {
        let identities = {
            let mut st = lock(&self.state);
            if st.phase != Phase::Idle {
                return Err(SessionError::Busy);
            }
            if st.identities.is_empty() {
                log::debug!("find ignored: no identities registered");
                return Ok(None);
            }
            st.phase = Phase::Matching;
            st.last_result = None;
            st.identities.clone()
        };
        let _guard = PhaseGuard { state: &self.state };

        let result = match self.capture_descriptor() {
            Ok(Some(descriptor)) => {
                match matcher::match_descriptor(&descriptor, &identities, self.options.threshold) {
                    MatchOutcome::Matched { name, distance } => {
                        LastResult::Matched { name, distance }
                    }
                    MatchOutcome::Unknown => LastResult::NoMatch,
                }
            }
            Ok(None) => {
                log::info!("find: no face detected");
                LastResult::NoMatch
            }
            Err(e) => {
                log::warn!("find failed: {}", e);
                lock(&self.state).last_error = Some(e.to_string());
                return Err(e);
            }
        };

        let mut st = lock(&self.state);
        st.last_result = Some(result.clone());
        st.last_error = None;
        Ok(Some(result))
    }

    /// Forget every registered identity, persisted and in memory.
    pub fn clear(&self) -> Result<(), SessionError> {
        let mut st = lock(&self.state);
        if st.phase != Phase::Idle {
            return Err(SessionError::Busy);
        }
        lock(&self.store).clear()?;
        st.identities.clear();
        st.last_result = None;
        log::info!("cleared all stored identities");
        Ok(())
    }

    fn capture_descriptor(&self) -> Result<Option<Descriptor>, SessionError> {
        let mut capture = lock(&self.capture);
        let frame = capture
            .frames
            .frame()
            .map_err(SessionError::CameraUnavailable)?;
        let detection = capture
            .extractor
            .extract(&frame)
            .map_err(SessionError::Extraction)?;
        match detection {
            Some(d) if d.descriptor.is_empty() || !d.descriptor.is_finite() => Err(
                SessionError::Extraction(anyhow::anyhow!(
                    "extractor returned an empty or non-finite descriptor"
                )),
            ),
            other => Ok(other.map(|d| d.descriptor)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use facereg_vision::{Detection, Frame, StillFrame};
    use std::collections::VecDeque;

    struct Scripted(VecDeque<Option<Vec<f32>>>);

    impl DescriptorExtractor for Scripted {
        fn extract(&mut self, _frame: &Frame) -> anyhow::Result<Option<Detection>> {
            Ok(self
                .0
                .pop_front()
                .flatten()
                .map(|v| Detection::new(Descriptor::new(v))))
        }
    }

    struct Failing;

    impl DescriptorExtractor for Failing {
        fn extract(&mut self, _frame: &Frame) -> anyhow::Result<Option<Detection>> {
            anyhow::bail!("model crashed")
        }
    }

    fn still() -> StillFrame {
        StillFrame::from_frame(Frame::new(2, 2))
    }

    fn session(
        outputs: Vec<Option<Vec<f32>>>,
    ) -> Session<MemoryStorage, Scripted, StillFrame> {
        Session::start(
            IdentityStore::new(MemoryStorage::default()),
            Scripted(outputs.into()),
            still(),
            SessionOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_register_clears_input() {
        let s = session(vec![Some(vec![1.0, 0.0, 0.0])]);
        s.set_name_input("  Alice ");
        let identity = s.register().unwrap();
        assert_eq!(identity, Identity::new("Alice", vec![1.0, 0.0, 0.0]));

        let snap = s.snapshot();
        assert_eq!(snap.phase, Phase::Idle);
        assert_eq!(snap.name_input, "");
        assert_eq!(snap.identity_count, 1);
        assert_eq!(snap.last_error, None);
    }

    #[test]
    fn test_empty_name_rejected() {
        let s = session(vec![Some(vec![1.0])]);
        for name in ["", "   "] {
            s.set_name_input(name);
            assert!(matches!(s.register(), Err(SessionError::EmptyName)));
        }
        let snap = s.snapshot();
        assert_eq!(snap.identity_count, 0);
        assert_eq!(snap.phase, Phase::Idle);
        assert!(snap.last_error.is_some());
        assert!(lock(&s.store).load().unwrap().is_empty());
    }

    #[test]
    fn test_no_face_on_register_keeps_input() {
        let s = session(vec![None]);
        s.set_name_input("Alice");
        assert!(matches!(s.register(), Err(SessionError::NoFaceDetected)));
        let snap = s.snapshot();
        assert_eq!(snap.name_input, "Alice");
        assert_eq!(snap.identity_count, 0);
        assert_eq!(snap.phase, Phase::Idle);
        assert_eq!(snap.last_error.as_deref(), Some("no face detected"));
    }

    #[test]
    fn test_dimension_mismatch_not_persisted() {
        let s = session(vec![Some(vec![1.0, 0.0]), Some(vec![1.0, 0.0, 0.0])]);
        s.set_name_input("Alice");
        s.register().unwrap();
        s.set_name_input("Bob");
        assert!(matches!(
            s.register(),
            Err(SessionError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
        assert_eq!(lock(&s.store).load().unwrap().len(), 1);
    }

    #[test]
    fn test_find_without_identities_is_noop() {
        let s = session(vec![Some(vec![1.0])]);
        assert_eq!(s.find().unwrap(), None);
        assert_eq!(s.snapshot().last_result, None);
    }

    #[test]
    fn test_find_matches_and_misses() {
        let s = session(vec![
            Some(vec![1.0, 0.0, 0.0]),
            Some(vec![0.0, 1.0, 0.0]),
            Some(vec![0.9, 0.1, 0.0]),
            Some(vec![0.0, 0.0, 1.0]),
            None,
        ]);
        s.set_name_input("Alice");
        s.register().unwrap();
        s.set_name_input("Bob");
        s.register().unwrap();

        match s.find().unwrap() {
            Some(LastResult::Matched { name, .. }) => assert_eq!(name, "Alice"),
            other => panic!("expected Alice, got {other:?}"),
        }
        assert_eq!(s.find().unwrap(), Some(LastResult::NoMatch));
        assert_eq!(s.find().unwrap(), Some(LastResult::NoMatch));
        assert_eq!(s.snapshot().last_result, Some(LastResult::NoMatch));
    }

    #[test]
    fn test_extractor_failure_returns_to_idle() {
        let mut store = IdentityStore::new(MemoryStorage::default());
        store.save(&[Identity::new("Alice", vec![1.0])]).unwrap();
        let s = Session::start(store, Failing, still(), SessionOptions::default()).unwrap();

        assert!(matches!(s.find(), Err(SessionError::Extraction(_))));
        assert_eq!(s.phase(), Phase::Idle);
        s.set_name_input("Bob");
        assert!(matches!(s.register(), Err(SessionError::Extraction(_))));
        assert_eq!(s.phase(), Phase::Idle);
        assert_eq!(s.identities().len(), 1);
    }

    #[test]
    fn test_clear() {
        let s = session(vec![Some(vec![1.0])]);
        s.set_name_input("Alice");
        s.register().unwrap();
        s.clear().unwrap();
        assert!(s.identities().is_empty());
        assert!(lock(&s.store).load().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_store_policy() {
        let mut storage = MemoryStorage::default();
        storage.set(crate::storage::USERS_KEY, "garbage").unwrap();

        let failed = Session::start(
            IdentityStore::new(storage.clone()),
            Scripted(VecDeque::new()),
            still(),
            SessionOptions {
                on_corrupt: CorruptPolicy::Fail,
                ..SessionOptions::default()
            },
        );
        assert!(matches!(
            failed,
            Err(SessionError::Store(StoreError::Corrupt(_)))
        ));

        let s = Session::start(
            IdentityStore::new(storage),
            Scripted(VecDeque::new()),
            still(),
            SessionOptions::default(),
        )
        .unwrap();
        assert!(s.identities().is_empty());
    }
}
