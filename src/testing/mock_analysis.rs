//! Scripted [`AnalysisService`] double

use crate::analysis::{AnalysisService, AnalyzeRequest, AnalyzeResponse};
use crate::errors::CameraError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Returns scripted responses in order, then the fallback forever.
pub struct MockAnalysisService {
    script: Mutex<VecDeque<Result<AnalyzeResponse, CameraError>>>,
    fallback: Mutex<Result<AnalyzeResponse, CameraError>>,
    latency: Mutex<Duration>,
    fail_reset: Mutex<bool>,
    requests: Mutex<Vec<AnalyzeRequest>>,
    resets: AtomicUsize,
    completed: AtomicUsize,
}

impl MockAnalysisService {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Ok(AnalyzeResponse::default())),
            latency: Mutex::new(Duration::ZERO),
            fail_reset: Mutex::new(false),
            requests: Mutex::new(Vec::new()),
            resets: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    /// Queue a response for the next unscripted `analyze` call
    pub fn push_response(&self, response: Result<AnalyzeResponse, CameraError>) {
        lock(&self.script).push_back(response);
    }

    pub fn push_detection(&self, rubbing: bool, acid: bool) {
        self.push_response(Ok(AnalyzeResponse::detected(rubbing, acid)));
    }

    /// Response used once the script is exhausted
    pub fn set_fallback(&self, response: Result<AnalyzeResponse, CameraError>) {
        *lock(&self.fallback) = response;
    }

    /// Delay applied to every `analyze` call before it answers
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    pub fn fail_reset(&self, fail: bool) {
        *lock(&self.fail_reset) = fail;
    }

    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    /// Calls that have been received, including ones still waiting on latency
    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<AnalyzeRequest> {
        lock(&self.requests).clone()
    }
}

impl Default for MockAnalysisService {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

#[async_trait]
impl AnalysisService for MockAnalysisService {
    async fn reset_status(&self) -> Result<(), CameraError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        if *lock(&self.fail_reset) {
            return Err(CameraError::AnalysisUnreachable(
                "reset_status refused".to_string(),
            ));
        }
        Ok(())
    }

    async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalyzeResponse, CameraError> {
        lock(&self.requests).push(request.clone());

        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let scripted = lock(&self.script).pop_front();
        let response = match scripted {
            Some(response) => response,
            None => lock(&self.fallback).clone(),
        };
        self.completed.fetch_add(1, Ordering::SeqCst);
        response
    }
}
