//! Corpus-wide pattern deduplication
//!
//! [`PatternRegistry`] maps combo fingerprints to canonical [`Pattern`]s.
//! In a running pipeline the registry is owned by a single
//! [`PatternMinerService`] task and reached through a cloneable
//! [`PatternMinerHandle`]; every request carries a oneshot reply channel.

use crate::error::{MineError, Result as MineResult};
use crate::pattern::{FingerprintedChunk, Pattern, PatternInstance, PatternUpsert, Transform};
use crate::state::SongAnalysis;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Default request queue depth of the miner service
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Everything the registry needs from one analyzed song
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongSubmission {
    pub song_id: String,
    pub artist: Option<String>,
    pub chunks: Vec<FingerprintedChunk>,
}

impl SongSubmission {
    pub fn from_analysis(analysis: &SongAnalysis) -> Self {
        Self {
            song_id: analysis.song.id.clone(),
            artist: analysis.song.artist.clone(),
            chunks: analysis.fingerprints.clone(),
        }
    }
}

/// Transposition that maps an occurrence onto the canonical pattern
pub fn transform_for(canonical: &Pattern, chunk: &FingerprintedChunk) -> Transform {
    match (canonical.anchor_pitch, chunk.chunk.anchor_pitch()) {
        (Some(canonical_anchor), Some(anchor)) => {
            Transform::transpose((canonical_anchor as i16 - anchor as i16) as i8)
        }
        _ => Transform::identity(),
    }
}

/// Fraction of intervals matching the canonical pattern; 1.0 for drums
pub fn instance_confidence(canonical: &Pattern, chunk: &FingerprintedChunk) -> f64 {
    match (&canonical.pitch, &chunk.pitch) {
        (Some(expected), Some(actual)) => {
            let len = expected.intervals.len().max(actual.intervals.len());
            if len == 0 {
                return 1.0;
            }
            let matching = expected
                .intervals
                .iter()
                .zip(&actual.intervals)
                .filter(|(a, b)| a == b)
                .count();
            matching as f64 / len as f64
        }
        _ => 1.0,
    }
}

/// Canonical patterns keyed by combo fingerprint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternRegistry {
    by_fingerprint: HashMap<String, String>,
    patterns: BTreeMap<String, Pattern>,
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject chunks that would corrupt the registry, without touching it
    fn check_chunk(
        &self,
        chunk: &FingerprintedChunk,
        minted: &mut HashMap<String, String>,
    ) -> MineResult<()> {
        let rhythm_steps = chunk.rhythm.steps();
        if rhythm_steps != chunk.chunk.steps as usize {
            return Err(MineError::ContractViolation(format!(
                "rhythm fingerprint has {} steps, chunk has {}",
                rhythm_steps, chunk.chunk.steps
            )));
        }
        if let Some(note) = chunk.chunk.notes.iter().find(|n| n.step >= chunk.chunk.steps) {
            return Err(MineError::ContractViolation(format!(
                "chunk note at step {} outside a {}-step chunk",
                note.step, chunk.chunk.steps
            )));
        }

        let combo = &chunk.combo_fingerprint;
        if self.by_fingerprint.contains_key(combo) {
            return Ok(());
        }

        let id = Pattern::id_for(combo);
        let existing = self
            .patterns
            .get(&id)
            .map(|p| p.combo_fingerprint.as_str())
            .or_else(|| minted.get(&id).map(String::as_str));
        if let Some(other) = existing {
            if other != combo {
                return Err(MineError::ContractViolation(format!(
                    "pattern id {} already minted for a different fingerprint",
                    id
                )));
            }
        }
        minted.insert(id, combo.clone());
        Ok(())
    }

    /// Merge one fingerprinted chunk
    pub fn register_chunk(
        &mut self,
        song_id: &str,
        artist: Option<&str>,
        chunk: &FingerprintedChunk,
    ) -> MineResult<PatternUpsert> {
        self.check_chunk(chunk, &mut HashMap::new())?;
        Ok(self.merge_chunk(song_id, artist, chunk))
    }

    fn merge_chunk(
        &mut self,
        song_id: &str,
        artist: Option<&str>,
        chunk: &FingerprintedChunk,
    ) -> PatternUpsert {
        let id = match self.by_fingerprint.get(&chunk.combo_fingerprint) {
            Some(id) => id.clone(),
            None => {
                let pattern = Pattern::from_chunk(chunk);
                let id = pattern.id.clone();
                debug!(
                    pattern = %id,
                    role = pattern.role.name(),
                    combo = %pattern.combo_fingerprint,
                    "new pattern"
                );
                self.by_fingerprint
                    .insert(chunk.combo_fingerprint.clone(), id.clone());
                self.patterns.insert(id.clone(), pattern);
                id
            }
        };

        // Present by construction: ids are only ever inserted together
        let pattern = self
            .patterns
            .entry(id.clone())
            .or_insert_with(|| Pattern::from_chunk(chunk));
        pattern.stats.record(song_id, artist);

        let instance = PatternInstance {
            pattern_id: id,
            song_id: song_id.to_string(),
            track_id: chunk.chunk.track_id,
            start_bar: chunk.chunk.bar_index,
            confidence: instance_confidence(pattern, chunk),
            transform: transform_for(pattern, chunk),
        };

        PatternUpsert {
            pattern: pattern.clone(),
            instance,
        }
    }

    /// Merge every chunk of a song, or none of them
    pub fn register_song(&mut self, submission: &SongSubmission) -> MineResult<Vec<PatternUpsert>> {
        let mut minted = HashMap::new();
        for chunk in &submission.chunks {
            self.check_chunk(chunk, &mut minted)?;
        }

        let before = self.patterns.len();
        let upserts: Vec<PatternUpsert> = submission
            .chunks
            .iter()
            .map(|chunk| self.merge_chunk(&submission.song_id, submission.artist.as_deref(), chunk))
            .collect();

        info!(
            "Merged song {}: {} instances, {} new patterns, {} total",
            submission.song_id,
            upserts.len(),
            self.patterns.len() - before,
            self.patterns.len()
        );
        Ok(upserts)
    }

    pub fn get(&self, pattern_id: &str) -> Option<&Pattern> {
        self.patterns.get(pattern_id)
    }

    pub fn get_by_fingerprint(&self, combo_fingerprint: &str) -> Option<&Pattern> {
        self.by_fingerprint
            .get(combo_fingerprint)
            .and_then(|id| self.patterns.get(id))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// All patterns ordered by id
    pub fn patterns(&self) -> Vec<&Pattern> {
        self.patterns.values().collect()
    }

    /// Top `n` patterns by occurrence count, ties by id
    pub fn most_common(&self, n: usize) -> Vec<&Pattern> {
        let mut ranked: Vec<&Pattern> = self.patterns.values().collect();
        ranked.sort_by(|a, b| {
            b.stats
                .occurrences
                .cmp(&a.stats.occurrences)
                .then(a.id.cmp(&b.id))
        });
        ranked.truncate(n);
        ranked
    }

    pub fn patterns_with_tag(&self, tag: &str) -> Vec<&Pattern> {
        self.patterns
            .values()
            .filter(|p| p.tags.iter().any(|t| t == tag))
            .collect()
    }
}

/// Requests understood by the miner service
pub enum MinerRequest {
    SubmitSong {
        submission: SongSubmission,
        response: oneshot::Sender<MineResult<Vec<PatternUpsert>>>,
    },
    Lookup {
        pattern_id: String,
        response: oneshot::Sender<Option<Pattern>>,
    },
    Snapshot {
        response: oneshot::Sender<PatternRegistry>,
    },
}

/// Single owner of the registry
pub struct PatternMinerService {
    registry: PatternRegistry,
    requests: mpsc::Receiver<MinerRequest>,
}

impl PatternMinerService {
    pub fn new(registry: PatternRegistry, requests: mpsc::Receiver<MinerRequest>) -> Self {
        Self { registry, requests }
    }

    /// Unspawned service plus a handle wired to it
    pub fn channel(registry: PatternRegistry, queue_depth: usize) -> (PatternMinerHandle, Self) {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        (PatternMinerHandle { requests: tx }, Self::new(registry, rx))
    }

    /// Serve requests until every handle is dropped, then hand back the registry
    pub async fn run(mut self) -> PatternRegistry {
        while let Some(request) = self.requests.recv().await {
            match request {
                MinerRequest::SubmitSong {
                    submission,
                    response,
                } => {
                    let result = self.registry.register_song(&submission);
                    // Receiver may have given up; the merge stands either way
                    let _ = response.send(result);
                }
                MinerRequest::Lookup {
                    pattern_id,
                    response,
                } => {
                    let _ = response.send(self.registry.get(&pattern_id).cloned());
                }
                MinerRequest::Snapshot { response } => {
                    let _ = response.send(self.registry.clone());
                }
            }
        }
        debug!("Pattern miner channel closed, {} patterns", self.registry.len());
        self.registry
    }
}

/// Cloneable client of the miner service
#[derive(Clone)]
pub struct PatternMinerHandle {
    requests: mpsc::Sender<MinerRequest>,
}

fn unavailable<E: std::fmt::Display>(err: E) -> MineError {
    MineError::RegistryUnavailable(err.to_string())
}

impl PatternMinerHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> MinerRequest,
    ) -> MineResult<T> {
        let (tx, rx) = oneshot::channel();
        self.requests.send(build(tx)).await.map_err(unavailable)?;
        rx.await.map_err(unavailable)
    }

    pub async fn submit_song(&self, submission: SongSubmission) -> MineResult<Vec<PatternUpsert>> {
        self.request(|response| MinerRequest::SubmitSong {
            submission,
            response,
        })
        .await?
    }

    pub async fn submit_analysis(&self, analysis: &SongAnalysis) -> MineResult<Vec<PatternUpsert>> {
        self.submit_song(SongSubmission::from_analysis(analysis)).await
    }

    pub async fn submit_chunk(
        &self,
        song_id: &str,
        artist: Option<&str>,
        chunk: FingerprintedChunk,
    ) -> MineResult<PatternUpsert> {
        let submission = SongSubmission {
            song_id: song_id.to_string(),
            artist: artist.map(str::to_string),
            chunks: vec![chunk],
        };
        self.submit_song(submission)
            .await?
            .pop()
            .ok_or_else(|| MineError::ContractViolation("chunk merge produced no instance".into()))
    }

    pub async fn get(&self, pattern_id: &str) -> MineResult<Option<Pattern>> {
        let pattern_id = pattern_id.to_string();
        self.request(|response| MinerRequest::Lookup {
            pattern_id,
            response,
        })
        .await
    }

    pub async fn snapshot(&self) -> MineResult<PatternRegistry> {
        self.request(|response| MinerRequest::Snapshot { response })
            .await
    }
}

/// A spawned miner service plus the handle used to reach it
pub struct PatternMiner {
    handle: PatternMinerHandle,
    task: JoinHandle<PatternRegistry>,
}

impl PatternMiner {
    /// Spawn a service over an empty registry; needs a tokio runtime
    pub fn spawn() -> Self {
        Self::spawn_with(PatternRegistry::new(), DEFAULT_QUEUE_DEPTH)
    }

    pub fn spawn_with(registry: PatternRegistry, queue_depth: usize) -> Self {
        let (handle, service) = PatternMinerService::channel(registry, queue_depth);
        let task = tokio::spawn(service.run());
        Self { handle, task }
    }

    pub fn handle(&self) -> PatternMinerHandle {
        self.handle.clone()
    }

    /// Close this handle and wait for the final registry.
    ///
    /// Returns once every cloned handle has also been dropped.
    pub async fn shutdown(self) -> MineResult<PatternRegistry> {
        drop(self.handle);
        self.task.await.map_err(unavailable)
    }
}
