use crate::config::Config;
use crate::fingerprint::FingerprintEngine;
use crate::store::Store;
use crate::Result;

use super::{ConsensusAligner, Label, PcmAudio, Recognizer, ScanState, Timings};

/// Output of [ScanController::scan].
#[derive(Clone, Debug, Default)]
pub struct ScanReport {
    pub labels: Vec<Label>,
    /// Number of windows that were fingerprinted.
    pub windows: usize,
    pub timings: Timings,
}

/// Slides a window across a file and reports the ads it recognizes.
///
/// Each iteration fingerprints `[position, position + span)`. If an ad is recognized, the
/// window jumps to the end of the matched ad, whether or not the match was confident enough
/// to be reported. Otherwise it steps forward by `skip`. The position strictly increases on
/// every iteration, and the scan stops once a full window no longer fits.
pub struct ScanController<'a, E: FingerprintEngine, S: Store> {
    config: &'a Config,
    recognizer: Recognizer<'a, E, S>,
}

impl<'a, E: FingerprintEngine, S: Store> ScanController<'a, E, S> {
    pub fn new(config: &'a Config, engine: &'a E, store: &'a S) -> Self {
        // Only the best candidate of a window is ever used.
        let aligner = ConsensusAligner::new(engine.params())
            .with_top_n(Some(1))
            .with_min_matches(config.min_matches);
        Self {
            config,
            recognizer: Recognizer::new(engine, store, aligner),
        }
    }

    /// Builds the initial scan state for `audio`.
    pub fn start(&self, audio: &PcmAudio) -> ScanState {
        ScanState::new(
            audio.duration(),
            self.config.analyze_span,
            self.config.analyze_skip,
        )
    }

    /// Processes the window at the current position and advances `state`.
    ///
    /// Returns the label emitted for this window, if any.
    pub fn step(
        &self,
        audio: &PcmAudio,
        state: &mut ScanState,
        timings: &mut Timings,
    ) -> Result<Option<Label>> {
        let position = state.position;
        let samples = audio.slice(position, position + state.span);
        let recognition = self.recognizer.recognize(samples, audio.sample_rate())?;
        timings.add(&recognition.timings);
        let queried_hashes = recognition.queried_hashes;

        let candidate = match recognition.candidates.into_iter().next() {
            Some(c) => c,
            None => {
                tracing::trace!(position, "no match in window");
                state.advance_to(position + state.skip)?;
                return Ok(None);
            }
        };

        let mut end = position + candidate.duration;
        if !(end > position) {
            end = position + state.skip;
        }
        let corrected_start = (position - candidate.offset_seconds).max(0.0);

        let label = if candidate.fingerprinted_confidence > self.config.confidence_threshold {
            let label = Label::new(corrected_start, end, candidate.song_name);
            tracing::info!(
                input_confidence = candidate.input_confidence,
                fingerprinted_confidence = candidate.fingerprinted_confidence,
                "found {}",
                label
            );
            Some(label)
        } else {
            // At a single offset each queried hash aligns at most once, so a window with too
            // few hashes can never clear the threshold for a long ad.
            let reachable = queried_hashes as f64
                > self.config.confidence_threshold * candidate.total_hashes as f64;
            tracing::debug!(
                position,
                fingerprinted_confidence = candidate.fingerprinted_confidence,
                reachable,
                "skipping low confidence match for {}",
                candidate.song_name
            );
            None
        };

        state.advance_to(end)?;

        Ok(label)
    }

    /// Scans all of `audio`.
    pub fn scan(&self, audio: &PcmAudio) -> Result<ScanReport> {
        let span = tracing::span!(tracing::Level::TRACE, "scan");
        let _enter = span.enter();

        let mut state = self.start(audio);
        let mut report = ScanReport::default();

        tracing::debug!(
            duration = state.duration,
            span = state.span,
            skip = state.skip,
            "starting scan"
        );

        while state.is_scanning() {
            let label = self.step(audio, &mut state, &mut report.timings)?;
            report.windows += 1;
            report.labels.extend(label);
        }

        tracing::debug!(
            windows = report.windows,
            labels = report.labels.len(),
            total_ms = report.timings.total().as_millis() as u64,
            "completed scan"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod test {
    use std::cell::Cell;
    use std::collections::HashSet;

    use super::*;
    use crate::audio::{ContentHash, RawMatch};
    use crate::fingerprint::testing::ChunkEngine;
    use crate::fingerprint::HashToken;
    use crate::store::{MemoryStore, SongId, SongRecord};
    use crate::Error;

    /// Reports `hits` matches at `offset` for a single song whenever the query starts with
    /// the `trigger` hash, or for every query if there is no trigger. Lookups fail once
    /// `fail_after` queries have been answered.
    struct ScriptedStore {
        song: SongRecord,
        hits: usize,
        offset: i64,
        trigger: Option<u32>,
        fail_after: Option<usize>,
        queries: Cell<usize>,
    }

    impl ScriptedStore {
        fn new(name: &str, duration: f64, total_hashes: usize, hits: usize) -> Self {
            Self {
                song: SongRecord {
                    id: 1,
                    name: name.to_string(),
                    content_hash: ContentHash::from_hex("00"),
                    duration_seconds: duration,
                    total_hashes,
                    fingerprinted: true,
                },
                hits,
                offset: 0,
                trigger: None,
                fail_after: None,
                queries: Cell::new(0),
            }
        }
    }

    impl Store for ScriptedStore {
        fn setup(&self) -> Result<()> {
            Ok(())
        }

        fn empty(&self) -> Result<()> {
            Err(Error::Store("read-only".to_string()))
        }

        fn get_all_songs(&self) -> Result<Vec<SongRecord>> {
            Ok(vec![self.song.clone()])
        }

        fn get_known_content_hashes(&self) -> Result<HashSet<ContentHash>> {
            Ok(HashSet::new())
        }

        fn insert_song(&self, _: &str, _: &ContentHash, _: f64) -> Result<SongId> {
            Err(Error::Store("read-only".to_string()))
        }

        fn insert_hashes(&self, _: SongId, _: &[HashToken]) -> Result<()> {
            Err(Error::Store("read-only".to_string()))
        }

        fn mark_fingerprinted(&self, _: SongId) -> Result<()> {
            Err(Error::Store("read-only".to_string()))
        }

        fn get_song_by_id(&self, song_id: SongId) -> Result<SongRecord> {
            if song_id == self.song.id {
                Ok(self.song.clone())
            } else {
                Err(Error::SongNotFound(song_id))
            }
        }

        fn return_matches(&self, hashes: &[HashToken]) -> Result<Vec<RawMatch>> {
            let answered = self.queries.get();
            if self.fail_after.map(|n| answered >= n).unwrap_or(false) {
                return Err(Error::Store("connection lost".to_string()));
            }
            self.queries.set(answered + 1);

            let triggered = match self.trigger {
                Some(h) => hashes.contains(&HashToken::new(h, 0)),
                None => true,
            };
            if triggered {
                Ok(vec![RawMatch::new(self.song.id, self.offset); self.hits])
            } else {
                Ok(Vec::new())
            }
        }
    }

    // 10 seconds at 100 Hz. Each sample encodes its own index, so every 0.1s chunk hashes
    // to a distinct value.
    fn stream() -> PcmAudio {
        PcmAudio::new((0..1000).collect(), 100)
    }

    #[test]
    fn test_detects_ad_and_jumps_past_it() {
        let config = Config::default();
        let engine = ChunkEngine::new(10, 100);
        let mut store = ScriptedStore::new("AdX", 3.0, 30, 30);
        store.trigger = Some(400);

        let scanner = ScanController::new(&config, &engine, &store);
        let report = scanner.scan(&stream()).unwrap();

        insta::assert_debug_snapshot!(report.labels, @r###"
        [
            Label {
                start_time: 4.0,
                end_time: 7.0,
                ad_name: "AdX",
            },
        ]
        "###);
        // Windows at 0, 1, 2, 3 and 4. After the jump to 7 no full window remains.
        assert_eq!(report.windows, 5);
    }

    #[test]
    fn test_step_positions() {
        let config = Config::default();
        let engine = ChunkEngine::new(10, 100);
        let mut store = ScriptedStore::new("AdX", 3.0, 30, 30);
        store.trigger = Some(400);
        let scanner = ScanController::new(&config, &engine, &store);

        let audio = stream();
        let mut state = scanner.start(&audio);
        let mut timings = Timings::default();
        let mut positions = vec![state.position];
        while state.is_scanning() {
            scanner.step(&audio, &mut state, &mut timings).unwrap();
            positions.push(state.position);
        }
        assert_eq!(positions, vec![0.0, 1.0, 2.0, 3.0, 4.0, 7.0]);
    }

    #[test]
    fn test_low_confidence_match_is_skipped_but_jumped() {
        let config = Config::default();
        let engine = ChunkEngine::new(10, 100);
        // 5 of 30 hashes aligned is below the 0.2 threshold.
        let mut store = ScriptedStore::new("AdX", 3.0, 30, 5);
        store.trigger = Some(100);

        let scanner = ScanController::new(&config, &engine, &store);
        let audio = stream();
        let mut state = scanner.start(&audio);
        let mut timings = Timings::default();

        assert_eq!(scanner.step(&audio, &mut state, &mut timings).unwrap(), None);
        assert_eq!(state.position, 1.0);
        assert_eq!(scanner.step(&audio, &mut state, &mut timings).unwrap(), None);
        assert_eq!(state.position, 4.0);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let config = Config {
            confidence_threshold: 0.5,
            ..Default::default()
        };
        let engine = ChunkEngine::new(10, 100);
        let store = ScriptedStore::new("AdX", 3.0, 30, 15);
        let scanner = ScanController::new(&config, &engine, &store);
        let report = scanner.scan(&stream()).unwrap();
        assert!(report.labels.is_empty());
    }

    #[test]
    fn test_threshold_uses_exact_ratio() {
        // 41 of 200 hashes is 0.205, which must not be rounded down to the 0.2 threshold.
        let config = Config::default();
        let engine = ChunkEngine::new(10, 100);
        let store = ScriptedStore::new("AdX", 3.0, 200, 41);
        let scanner = ScanController::new(&config, &engine, &store);
        let report = scanner.scan(&stream()).unwrap();
        assert_eq!(report.labels[0], Label::new(0.0, 3.0, "AdX"));
    }

    #[test]
    fn test_store_failure_aborts_scan() {
        let config = Config::default();
        let engine = ChunkEngine::new(10, 100);
        let mut store = ScriptedStore::new("AdX", 3.0, 30, 30);
        store.trigger = Some(900);
        store.fail_after = Some(2);

        let scanner = ScanController::new(&config, &engine, &store);
        assert!(matches!(scanner.scan(&stream()), Err(Error::Store(_))));

        // The failing window is not skipped over.
        let audio = stream();
        store.queries.set(0);
        let mut state = scanner.start(&audio);
        let mut timings = Timings::default();
        scanner.step(&audio, &mut state, &mut timings).unwrap();
        scanner.step(&audio, &mut state, &mut timings).unwrap();
        assert_eq!(state.position, 2.0);
        assert!(scanner.step(&audio, &mut state, &mut timings).is_err());
        assert_eq!(state.position, 2.0);
    }

    #[test]
    fn test_scan_keeps_only_best_candidate() {
        let config = Config {
            top_n: 5,
            ..Default::default()
        };
        let engine = ChunkEngine::new(10, 100);
        let store = ScriptedStore::new("AdX", 3.0, 30, 30);
        let scanner = ScanController::new(&config, &engine, &store);
        assert_eq!(scanner.recognizer.aligner().top_n(), Some(1));
    }

    #[test]
    fn test_offset_backs_off_to_ad_start() {
        let config = Config::default();
        let engine = ChunkEngine::new(10, 100);
        // The window at 5s sits 1.5s (15 chunks) into the ad.
        let mut store = ScriptedStore::new("AdX", 3.0, 30, 20);
        store.trigger = Some(500);
        store.offset = 15;

        let scanner = ScanController::new(&config, &engine, &store);
        let report = scanner.scan(&stream()).unwrap();
        assert_eq!(report.labels, vec![Label::new(3.5, 8.0, "AdX")]);
    }

    #[test]
    fn test_zero_length_candidate_still_advances() {
        let config = Config::default();
        let engine = ChunkEngine::new(10, 100);
        let store = ScriptedStore::new("Blip", 0.0, 30, 30);

        let scanner = ScanController::new(&config, &engine, &store);
        let report = scanner.scan(&stream()).unwrap();

        assert_eq!(report.windows, 7);
        assert_eq!(report.labels.len(), 7);
        assert_eq!(report.labels[0], Label::new(0.0, 1.0, "Blip"));
        assert_eq!(report.labels[6], Label::new(6.0, 7.0, "Blip"));
    }

    #[test]
    fn test_position_strictly_increases() {
        let engine = ChunkEngine::new(10, 100);
        let audio = stream();

        for span in [0.5, 1.0, 3.0, 9.5] {
            for skip in [0.1, 1.0, 4.0] {
                for duration in [0.0, 0.05, 2.5, 20.0] {
                    for offset in [-40, 0, 40] {
                        let config = Config {
                            analyze_span: span,
                            analyze_skip: skip,
                            ..Default::default()
                        };
                        let mut store = ScriptedStore::new("AdX", duration, 30, 30);
                        store.offset = offset;
                        let scanner = ScanController::new(&config, &engine, &store);

                        let mut state = scanner.start(&audio);
                        let mut timings = Timings::default();
                        let min_step = if duration > 0.0 {
                            duration.min(skip)
                        } else {
                            skip
                        };
                        let max_windows = (audio.duration() / min_step).ceil() as usize + 1;
                        let mut windows = 0;
                        while state.is_scanning() {
                            let before = state.position;
                            scanner.step(&audio, &mut state, &mut timings).unwrap();
                            assert!(state.position > before);
                            windows += 1;
                            assert!(windows <= max_windows);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_scan_against_registered_ad() {
        let config = Config::default();
        let engine = ChunkEngine::new(10, 100);
        let store = MemoryStore::new();
        let audio = stream();

        // Register the audio in [4, 7) as an ad.
        let ad = audio.slice(4.0, 7.0);
        let id = store
            .insert_song("AdX", &ContentHash::from_samples(ad), 3.0)
            .unwrap();
        store
            .insert_hashes(id, &engine.fingerprint(ad, 100).unwrap())
            .unwrap();
        store.mark_fingerprinted(id).unwrap();

        let report = ScanController::new(&config, &engine, &store)
            .scan(&audio)
            .unwrap();

        // The window at 2s catches the first second of the ad and the window at 5s the
        // remainder. Both back off to the true start.
        assert_eq!(
            report.labels,
            vec![Label::new(4.0, 5.0, "AdX"), Label::new(4.0, 8.0, "AdX")]
        );
        assert_eq!(report.windows, 4);
    }
}
