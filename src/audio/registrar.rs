use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::Config;
use crate::fingerprint::{FingerprintEngine, HashToken};
use crate::pool::TaskPool;
use crate::store::{SongId, Store};
use crate::{Error, Result};

use super::{ContentHash, Label, PcmAudio};

/// A clip that was added to the store.
#[derive(Clone, Debug, PartialEq)]
pub struct Registered {
    pub song_id: SongId,
    pub name: String,
    pub content_hash: ContentHash,
}

/// Output of [Registrar::register_batch].
#[derive(Clone, Debug, Default)]
pub struct RegistrationReport {
    pub registered: Vec<Registered>,
    /// Clips whose content was already registered, possibly under another name.
    pub skipped: Vec<String>,
    /// Clips that could not be fingerprinted, with the reason.
    pub failed: Vec<(String, String)>,
}

#[derive(Debug)]
struct PendingClip {
    name: String,
    content_hash: ContentHash,
    duration: f64,
}

/// Registers ad clips, skipping any whose decoded content is already in the store.
///
/// Clips of a batch are fingerprinted on a bounded pool of `worker_count` workers. Content
/// hashes are checked right before a clip is handed to a worker, and a hash becomes known as
/// soon as its clip is stored. With a single worker, a duplicate later in the batch is
/// therefore always caught. With more workers, two identical clips that are both handed out
/// before either is stored will both be registered, unless `in_flight_dedup` is enabled.
pub struct Registrar<'a, E: FingerprintEngine + 'static, S: Store> {
    config: &'a Config,
    engine: Arc<E>,
    store: &'a S,
}

impl<'a, E: FingerprintEngine + 'static, S: Store> Registrar<'a, E, S> {
    pub fn new(config: &'a Config, engine: Arc<E>, store: &'a S) -> Self {
        Self {
            config,
            engine,
            store,
        }
    }

    fn store_clip(&self, clip: &PendingClip, hashes: &[HashToken]) -> Result<SongId> {
        let song_id = self
            .store
            .insert_song(&clip.name, &clip.content_hash, clip.duration)?;
        self.store.insert_hashes(song_id, hashes)?;
        self.store.mark_fingerprinted(song_id)?;
        Ok(song_id)
    }

    /// Registers a single clip under `name`.
    ///
    /// Returns `None` if the same content is already registered.
    pub fn register_clip(&self, name: &str, audio: &PcmAudio) -> Result<Option<SongId>> {
        let content_hash = ContentHash::from_samples(audio.samples());
        if self
            .store
            .get_known_content_hashes()?
            .contains(&content_hash)
        {
            tracing::info!("{} already fingerprinted, continuing...", name);
            return Ok(None);
        }

        tracing::debug!("fingerprinting {}", name);
        let hashes = self
            .engine
            .fingerprint(audio.samples(), audio.sample_rate())?;
        let clip = PendingClip {
            name: name.to_string(),
            content_hash,
            duration: audio.duration(),
        };
        let song_id = self.store_clip(&clip, &hashes)?;

        tracing::info!(song_id, hashes = hashes.len(), "registered {}", name);

        Ok(Some(song_id))
    }

    // Waits for one worker and stores its result. Fingerprint failures are recorded in the
    // report; store failures abort the batch.
    fn drain_one(
        &self,
        pool: &mut TaskPool<Vec<HashToken>>,
        in_flight: &mut HashMap<usize, PendingClip>,
        known: &mut HashSet<ContentHash>,
        report: &mut RegistrationReport,
    ) -> Result<()> {
        let outcome =
            match pool.next_completed(self.config.poll_interval(), self.config.worker_timeout())? {
                Some(outcome) => outcome,
                None => return Ok(()),
            };
        let clip = in_flight
            .remove(&outcome.id)
            .ok_or_else(|| Error::WorkerPool(format!("unknown task id {}", outcome.id)))?;

        match outcome.result {
            Ok(hashes) => {
                let song_id = self.store_clip(&clip, &hashes)?;
                tracing::info!(song_id, hashes = hashes.len(), "registered {}", clip.name);
                known.insert(clip.content_hash.clone());
                report.registered.push(Registered {
                    song_id,
                    name: clip.name,
                    content_hash: clip.content_hash,
                });
            }
            Err(e) => {
                tracing::error!(
                    content_hash = %clip.content_hash,
                    duration = clip.duration,
                    error = %e,
                    "failed fingerprinting {}",
                    clip.name
                );
                report.failed.push((clip.name, e.to_string()));
            }
        }

        Ok(())
    }

    /// Registers each clip of `clips`, cut from `audio`, that is not already known.
    pub fn register_batch(&self, audio: &PcmAudio, clips: &[Label]) -> Result<RegistrationReport> {
        let span = tracing::span!(tracing::Level::TRACE, "register_batch");
        let _enter = span.enter();

        let mut report = RegistrationReport::default();
        let mut known = self.store.get_known_content_hashes()?;
        let mut pool = TaskPool::new(self.config.worker_count)?;
        let mut in_flight: HashMap<usize, PendingClip> = HashMap::new();
        let sample_rate = audio.sample_rate();

        tracing::debug!(
            clips = clips.len(),
            known = known.len(),
            workers = pool.workers(),
            "starting batch registration"
        );

        for (id, clip) in clips.iter().enumerate() {
            while pool.is_full() {
                self.drain_one(&mut pool, &mut in_flight, &mut known, &mut report)?;
            }

            let samples = audio.slice(clip.start_time, clip.end_time);
            if samples.is_empty() {
                tracing::warn!(
                    start = clip.start_time,
                    end = clip.end_time,
                    "clip {} has no audio, skipping",
                    clip.ad_name
                );
                report
                    .failed
                    .push((clip.ad_name.clone(), "clip has no audio".to_string()));
                continue;
            }

            let content_hash = ContentHash::from_samples(samples);

            if self.config.in_flight_dedup {
                while in_flight.values().any(|c| c.content_hash == content_hash) {
                    self.drain_one(&mut pool, &mut in_flight, &mut known, &mut report)?;
                }
            }

            if known.contains(&content_hash) {
                tracing::info!("{} already fingerprinted, continuing...", clip.ad_name);
                report.skipped.push(clip.ad_name.clone());
                continue;
            }

            tracing::debug!("fingerprinting {}", clip.ad_name);

            in_flight.insert(
                id,
                PendingClip {
                    name: clip.ad_name.clone(),
                    content_hash,
                    duration: samples.len() as f64 / sample_rate as f64,
                },
            );
            let engine = Arc::clone(&self.engine);
            let samples = samples.to_vec();
            pool.submit(id, move || engine.fingerprint(&samples, sample_rate));
        }

        while pool.pending() > 0 {
            self.drain_one(&mut pool, &mut in_flight, &mut known, &mut report)?;
        }

        tracing::info!(
            registered = report.registered.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "completed batch registration"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::audio::RawMatch;
    use crate::fingerprint::testing::ChunkEngine;
    use crate::store::{MemoryStore, SongRecord};

    #[derive(Clone, Copy, Debug, PartialEq)]
    enum Write {
        Song,
        Hashes,
        Mark,
    }

    /// A [MemoryStore] whose `failing` write operation always errors.
    struct FailingStore {
        inner: MemoryStore,
        failing: Write,
    }

    impl FailingStore {
        fn check(&self, op: Write) -> Result<()> {
            if op == self.failing {
                return Err(Error::Store(format!("{:?} write rejected", op)));
            }
            Ok(())
        }
    }

    impl Store for FailingStore {
        fn setup(&self) -> Result<()> {
            self.inner.setup()
        }

        fn empty(&self) -> Result<()> {
            self.inner.empty()
        }

        fn get_all_songs(&self) -> Result<Vec<SongRecord>> {
            self.inner.get_all_songs()
        }

        fn insert_song(&self, name: &str, hash: &ContentHash, duration: f64) -> Result<SongId> {
            self.check(Write::Song)?;
            self.inner.insert_song(name, hash, duration)
        }

        fn insert_hashes(&self, song_id: SongId, hashes: &[HashToken]) -> Result<()> {
            self.check(Write::Hashes)?;
            self.inner.insert_hashes(song_id, hashes)
        }

        fn mark_fingerprinted(&self, song_id: SongId) -> Result<()> {
            self.check(Write::Mark)?;
            self.inner.mark_fingerprinted(song_id)
        }

        fn get_song_by_id(&self, song_id: SongId) -> Result<SongRecord> {
            self.inner.get_song_by_id(song_id)
        }

        fn return_matches(&self, hashes: &[HashToken]) -> Result<Vec<RawMatch>> {
            self.inner.return_matches(hashes)
        }
    }

    // 10 seconds at 100 Hz. The audio in [5, 8) is an exact copy of [0, 3).
    fn master() -> PcmAudio {
        let samples = (0..1000i16)
            .map(|i| if (500..800).contains(&i) { i - 500 } else { i })
            .collect();
        PcmAudio::new(samples, 100)
    }

    fn clips() -> Vec<Label> {
        vec![
            Label::new(0.0, 3.0, "Promo1"),
            Label::new(3.0, 5.0, "Other"),
            Label::new(5.0, 8.0, "Promo2"),
        ]
    }

    fn engine() -> Arc<ChunkEngine> {
        Arc::new(ChunkEngine::new(10, 100))
    }

    fn names(report: &RegistrationReport) -> Vec<&str> {
        let mut names: Vec<&str> = report.registered.iter().map(|r| r.name.as_str()).collect();
        names.sort();
        names
    }

    #[test]
    fn test_serial_batch_skips_duplicate_content() {
        let config = Config::default();
        let store = MemoryStore::new();
        let registrar = Registrar::new(&config, engine(), &store);

        let report = registrar.register_batch(&master(), &clips()).unwrap();

        assert_eq!(names(&report), vec!["Other", "Promo1"]);
        assert_eq!(report.skipped, vec!["Promo2".to_string()]);
        assert!(report.failed.is_empty());

        let songs = store.get_all_songs().unwrap();
        assert_eq!(songs.len(), 2);
        let promo = songs.iter().find(|s| s.name == "Promo1").unwrap();
        assert_eq!(
            promo.content_hash,
            ContentHash::from_samples(master().slice(5.0, 8.0))
        );
        assert_eq!(promo.duration_seconds, 3.0);
        assert_eq!(promo.total_hashes, 30);
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let config = Config::default();
        let store = MemoryStore::new();
        let registrar = Registrar::new(&config, engine(), &store);

        registrar.register_batch(&master(), &clips()).unwrap();
        let before = store.get_all_songs().unwrap();

        let report = registrar.register_batch(&master(), &clips()).unwrap();
        assert!(report.registered.is_empty());
        assert_eq!(report.skipped.len(), 3);
        assert_eq!(store.get_all_songs().unwrap(), before);
    }

    #[test]
    fn test_concurrent_duplicates_race() {
        // Both copies are handed to workers before either is stored, so both pass the check.
        let config = Config {
            worker_count: 3,
            ..Default::default()
        };
        let store = MemoryStore::new();
        let registrar = Registrar::new(&config, engine(), &store);

        let report = registrar.register_batch(&master(), &clips()).unwrap();

        assert_eq!(names(&report), vec!["Other", "Promo1", "Promo2"]);
        assert!(report.skipped.is_empty());
        assert_eq!(store.get_all_songs().unwrap().len(), 3);
    }

    #[test]
    fn test_in_flight_dedup_closes_race() {
        let config = Config {
            worker_count: 3,
            in_flight_dedup: true,
            ..Default::default()
        };
        let store = MemoryStore::new();
        let registrar = Registrar::new(&config, engine(), &store);

        let report = registrar.register_batch(&master(), &clips()).unwrap();

        assert_eq!(names(&report), vec!["Other", "Promo1"]);
        assert_eq!(report.skipped, vec!["Promo2".to_string()]);
    }

    #[test]
    fn test_failed_clip_does_not_stop_batch() {
        let config = Config {
            worker_count: 2,
            ..Default::default()
        };
        let store = MemoryStore::new();
        let mut engine = ChunkEngine::new(10, 100);
        // "Other" starts with sample 300.
        engine.fail_on = Some(300);
        let registrar = Registrar::new(&config, Arc::new(engine), &store);

        let batch = vec![
            Label::new(3.0, 5.0, "Other"),
            Label::new(0.0, 3.0, "Promo1"),
            Label::new(8.0, 10.0, "Tail"),
        ];
        let report = registrar.register_batch(&master(), &batch).unwrap();

        assert_eq!(names(&report), vec!["Promo1", "Tail"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "Other");
        assert_eq!(store.get_all_songs().unwrap().len(), 2);
        assert!(store.get_known_content_hashes().unwrap().len() == 2);
    }

    #[test]
    fn test_store_failure_aborts_batch() {
        for failing in [Write::Song, Write::Hashes, Write::Mark] {
            for workers in [1, 3] {
                let config = Config {
                    worker_count: workers,
                    ..Default::default()
                };
                let store = FailingStore {
                    inner: MemoryStore::new(),
                    failing,
                };
                let registrar = Registrar::new(&config, engine(), &store);

                assert!(matches!(
                    registrar.register_batch(&master(), &clips()),
                    Err(Error::Store(_))
                ));
                assert!(store.get_all_songs().unwrap().is_empty());
            }
        }
    }

    #[test]
    fn test_store_failure_aborts_single_registration() {
        let config = Config::default();
        let store = FailingStore {
            inner: MemoryStore::new(),
            failing: Write::Hashes,
        };
        let registrar = Registrar::new(&config, engine(), &store);
        let clip = PcmAudio::new(master().slice(0.0, 3.0).to_vec(), 100);

        assert!(matches!(
            registrar.register_clip("Promo1", &clip),
            Err(Error::Store(_))
        ));
        assert!(store.get_known_content_hashes().unwrap().is_empty());
    }

    #[test]
    fn test_empty_clip_is_reported() {
        let config = Config::default();
        let store = MemoryStore::new();
        let registrar = Registrar::new(&config, engine(), &store);

        let batch = vec![Label::new(4.0, 4.0, "Nothing"), Label::new(20.0, 25.0, "Past")];
        let report = registrar.register_batch(&master(), &batch).unwrap();
        assert!(report.registered.is_empty());
        assert_eq!(report.failed.len(), 2);
    }

    #[test]
    fn test_register_clip() {
        let config = Config::default();
        let store = MemoryStore::new();
        let registrar = Registrar::new(&config, engine(), &store);
        let clip = PcmAudio::new(master().slice(0.0, 3.0).to_vec(), 100);

        let id = registrar.register_clip("Promo1", &clip).unwrap();
        assert!(id.is_some());
        assert_eq!(registrar.register_clip("Renamed", &clip).unwrap(), None);

        // A batch containing the same content is skipped as well.
        let report = registrar.register_batch(&master(), &clips()).unwrap();
        assert_eq!(names(&report), vec!["Other"]);
        assert_eq!(report.skipped.len(), 2);
    }
}
