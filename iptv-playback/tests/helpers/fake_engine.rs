//! Scripted player engine
//!
//! Each `open` pops the next scripted result; once the script runs out the
//! fallback result is returned forever.

use async_trait::async_trait;
use iptv_playback::playback::{EngineError, MediaSource, PlayerEngine};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub struct ScriptedEngine {
    script: Mutex<VecDeque<Result<(), EngineError>>>,
    fallback: Result<(), EngineError>,
    opened: Mutex<Vec<MediaSource>>,
    stops: AtomicUsize,
}

impl ScriptedEngine {
    /// Engine whose every open succeeds
    pub fn healthy() -> Self {
        Self::scripted(Vec::new(), Ok(()))
    }

    /// Engine whose every open fails with a network error
    pub fn broken() -> Self {
        Self::scripted(Vec::new(), Err(network_error()))
    }

    /// Engine that plays `script` first, then `fallback` forever
    pub fn scripted(script: Vec<Result<(), EngineError>>, fallback: Result<(), EngineError>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            opened: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
        }
    }

    /// Engine that fails `failures` times, then succeeds
    pub fn failing_times(failures: usize) -> Self {
        Self::scripted(vec![Err(network_error()); failures], Ok(()))
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub fn opened_sources(&self) -> Vec<MediaSource> {
        self.opened.lock().unwrap().clone()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlayerEngine for ScriptedEngine {
    async fn open(&self, source: &MediaSource) -> Result<(), EngineError> {
        self.opened.lock().unwrap().push(source.clone());
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn network_error() -> EngineError {
    EngineError::Network("connection reset".to_string())
}
