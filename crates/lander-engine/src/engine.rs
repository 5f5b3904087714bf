use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use lander_contracts::catalog::ChainSelector;
use lander_contracts::events::{EventLog, EventPayload};
use lander_contracts::runs::assets::{asset_exists, clear_assets, write_asset_file, GeneratedAsset};
use lander_contracts::runs::summary::{now_utc_iso, write_summary, RunSummary};
use lander_contracts::slots::ImageSlot;
use rayon::ThreadPoolBuilder;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config::{EngineConfig, PostProcessConfig};
use crate::error::ProviderError;
use crate::fallback::{acquire_with, FailedAttempt};
use crate::postprocess::{process, EncodedImage};
use crate::prompts::{PromptBuilder, PromptSet};
use crate::providers::{default_provider_registry, prompt_hash, ImageProvider, ImageProviderRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Sequential,
    Parallel { workers: usize },
}

impl RunMode {
    fn label(self) -> &'static str {
        match self {
            RunMode::Sequential => "sequential",
            RunMode::Parallel { .. } => "parallel",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SlotOutcome {
    pub slot: ImageSlot,
    pub prompt_hash: String,
    pub asset: Option<GeneratedAsset>,
    pub failures: Vec<FailedAttempt>,
    /// Event log writes that failed while the slot ran.
    pub event_errors: Vec<String>,
}

impl SlotOutcome {
    pub fn is_produced(&self) -> bool {
        self.asset.is_some()
    }
}

/// Everything one slot job needs; shared read-only across workers.
struct SlotRunner {
    out_dir: PathBuf,
    events: EventLog,
    registry: Arc<ImageProviderRegistry>,
    selector: ChainSelector,
    postprocess: PostProcessConfig,
    requested_provider: Option<String>,
}

impl SlotRunner {
    fn run_slot(&self, slot: ImageSlot, prompt: &str) -> SlotOutcome {
        let hash = prompt_hash(prompt, slot);
        let (names, fallback_reason) = match self
            .selector
            .select(self.requested_provider.as_deref(), slot)
        {
            Ok(selection) => (selection.providers, selection.fallback_reason),
            Err(reason) => (Vec::new(), Some(reason)),
        };
        let mut started = map_object(json!({
            "prompt_hash": hash,
            "chain": names,
        }));
        if let Some(reason) = fallback_reason {
            started.insert("fallback_reason".to_string(), json!(reason));
        }
        let mut event_errors = Vec::new();
        self.emit(&mut event_errors, "slot_started", slot, started);

        let chain: Vec<&dyn ImageProvider> = self
            .registry
            .resolve_chain(&names)
            .into_iter()
            .map(|provider| &**provider)
            .collect();
        let acquisition = acquire_with(&chain, prompt, slot, |image| {
            let watermarked = self.selector.catalog.is_watermarked(&image.provider);
            process(&image.bytes, slot, watermarked, &self.postprocess)
                .map(|encoded| (image.provider.clone(), encoded))
                .map_err(|err| ProviderError::Decode {
                    provider: image.provider.clone(),
                    detail: format!("{err:#}"),
                })
        });

        let mut failures = acquisition.failures;
        for failure in &failures {
            self.emit(
                &mut event_errors,
                "provider_failed",
                slot,
                map_object(json!({
                    "provider": failure.provider,
                    "kind": failure.kind,
                    "message": failure.message,
                })),
            );
        }

        let asset = acquisition.value.and_then(|(provider, encoded)| {
            match self.store(slot, &provider, encoded) {
                Ok(asset) => Some(asset),
                Err(err) => {
                    failures.push(FailedAttempt {
                        provider,
                        kind: "write",
                        message: format!("{err:#}"),
                    });
                    None
                }
            }
        });

        match &asset {
            Some(asset) => {
                self.emit(
                    &mut event_errors,
                    "slot_produced",
                    slot,
                    map_object(json!({
                        "provider": asset.provider,
                        "path": asset.path.to_string_lossy().to_string(),
                        "bytes": asset.bytes,
                        "quality": asset.quality,
                        "within_budget": asset.within_budget,
                    })),
                );
            }
            None => {
                self.emit(
                    &mut event_errors,
                    "slot_missing",
                    slot,
                    map_object(json!({
                        "attempted": acquisition.attempted,
                        "failures": failures.len(),
                    })),
                );
            }
        }

        SlotOutcome {
            slot,
            prompt_hash: hash,
            asset,
            failures,
            event_errors,
        }
    }

    /// Runs one slot; a panic anywhere inside becomes a missing slot.
    fn run_slot_guarded(&self, slot: ImageSlot, prompt: &str) -> SlotOutcome {
        match panic::catch_unwind(AssertUnwindSafe(|| self.run_slot(slot, prompt))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                let mut event_errors = Vec::new();
                self.emit(
                    &mut event_errors,
                    "slot_missing",
                    slot,
                    map_object(json!({ "panic": message })),
                );
                SlotOutcome {
                    slot,
                    prompt_hash: prompt_hash(prompt, slot),
                    asset: None,
                    failures: vec![FailedAttempt {
                        provider: "engine".to_string(),
                        kind: "panic",
                        message,
                    }],
                    event_errors,
                }
            }
        }
    }

    fn emit(
        &self,
        errors: &mut Vec<String>,
        event_type: &str,
        slot: ImageSlot,
        payload: EventPayload,
    ) {
        if let Err(err) = self.events.emit_slot(event_type, slot, payload) {
            errors.push(format!("{event_type}: {err:#}"));
        }
    }

    fn store(
        &self,
        slot: ImageSlot,
        provider: &str,
        encoded: EncodedImage,
    ) -> anyhow::Result<GeneratedAsset> {
        let path = write_asset_file(&self.out_dir, slot, &encoded.bytes)?;
        Ok(GeneratedAsset {
            slot,
            path,
            bytes: encoded.bytes.len() as u64,
            mime: encoded.format.mime().to_string(),
            provider: provider.to_string(),
            width: encoded.width,
            height: encoded.height,
            quality: encoded.quality,
            within_budget: encoded.within_budget,
        })
    }
}

/// Drives one landing-page run: per-slot fallback, post-processing and
/// file output, sequentially or on a worker pool.
pub struct LandingEngine {
    run_id: String,
    theme: String,
    started_at: String,
    summary_path: PathBuf,
    runner: Arc<SlotRunner>,
}

impl LandingEngine {
    pub fn new(
        out_dir: impl Into<PathBuf>,
        theme: &str,
        config: &EngineConfig,
        registry: ImageProviderRegistry,
    ) -> Self {
        let out_dir = out_dir.into();
        let run_id = format!("run-{}", &Uuid::new_v4().simple().to_string()[..12]);
        let events = EventLog::new(out_dir.join("events.jsonl"), run_id.clone());
        let selector =
            ChainSelector::new(None, config.fallback_order).with_placeholder(config.placeholder);
        Self {
            run_id,
            theme: theme.trim().to_string(),
            started_at: now_utc_iso(),
            summary_path: out_dir.join("summary.json"),
            runner: Arc::new(SlotRunner {
                out_dir,
                events,
                registry: Arc::new(registry),
                selector,
                postprocess: config.postprocess.clone(),
                requested_provider: None,
            }),
        }
    }

    pub fn with_default_providers(
        out_dir: impl Into<PathBuf>,
        theme: &str,
        config: &EngineConfig,
    ) -> anyhow::Result<Self> {
        let registry = default_provider_registry(config)?;
        Ok(Self::new(out_dir, theme, config, registry))
    }

    /// Moves `provider` to the front of every chain that can use it.
    pub fn with_requested_provider(mut self, provider: Option<String>) -> Self {
        if let Some(runner) = Arc::get_mut(&mut self.runner) {
            runner.requested_provider = provider.filter(|value| !value.trim().is_empty());
        }
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn theme(&self) -> &str {
        &self.theme
    }

    pub fn out_dir(&self) -> &Path {
        &self.runner.out_dir
    }

    pub fn events_path(&self) -> &Path {
        self.runner.events.path()
    }

    pub fn summary_path(&self) -> &Path {
        &self.summary_path
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.runner.registry.list()
    }

    pub fn run(
        &self,
        prompts: &PromptSet,
        mode: RunMode,
        progress: &mut dyn FnMut(&SlotOutcome, usize),
    ) -> anyhow::Result<Vec<SlotOutcome>> {
        let slots: Vec<ImageSlot> = prompts.iter().map(|(slot, _)| slot).collect();
        self.start(&slots, mode, false)?;
        self.pass(prompts, mode, 0, progress)
    }

    /// Runs on template prompts right away while the builder enriches them
    /// in the background, then retries the slots left without a file once
    /// the enriched prompts arrive within `wait`.
    pub fn run_with_enrichment(
        &self,
        builder: &PromptBuilder,
        slots: &[ImageSlot],
        mode: RunMode,
        wait: Duration,
        progress: &mut dyn FnMut(&SlotOutcome, usize),
    ) -> anyhow::Result<Vec<SlotOutcome>> {
        let templates = builder.templates(&self.theme, slots);
        let enriched = builder.has_enrichment().then(|| {
            let (tx, rx) = mpsc::channel();
            let builder = builder.clone();
            let theme = self.theme.clone();
            let slots = slots.to_vec();
            thread::spawn(move || {
                let _ = tx.send(builder.enrich_all(&theme, &slots));
            });
            rx
        });

        self.start(slots, mode, enriched.is_some())?;
        let mut outcomes = self.pass(&templates, mode, 0, progress)?;
        let Some(rx) = enriched else {
            return Ok(outcomes);
        };

        let missing: Vec<ImageSlot> = slots
            .iter()
            .copied()
            .filter(|slot| !asset_exists(self.out_dir(), *slot))
            .collect();
        if missing.is_empty() {
            return Ok(outcomes);
        }

        let better = match rx.recv_timeout(wait) {
            Ok(prompts) => prompts,
            Err(_) => {
                self.skip_second_pass("enrichment not ready", wait)?;
                return Ok(outcomes);
            }
        };
        let retry: PromptSet = missing
            .iter()
            .filter_map(|slot| {
                better
                    .get(*slot)
                    .map(|prompt| (*slot, prompt.to_string()))
            })
            .collect();
        if retry.is_empty() {
            self.skip_second_pass("enrichment produced no new prompts", wait)?;
            return Ok(outcomes);
        }
        self.runner.events.emit(
            "second_pass_started",
            map_object(json!({
                "slots": retry.iter().map(|(slot, _)| slot.id()).collect::<Vec<_>>(),
            })),
        )?;

        let produced = outcomes.iter().filter(|outcome| outcome.is_produced()).count();
        let second = self.pass(&retry, mode, produced, progress)?;
        for retried in second {
            match outcomes.iter_mut().find(|outcome| outcome.slot == retried.slot) {
                Some(existing) => {
                    let mut failures = std::mem::take(&mut existing.failures);
                    failures.extend(retried.failures);
                    let mut event_errors = std::mem::take(&mut existing.event_errors);
                    event_errors.extend(retried.event_errors);
                    *existing = SlotOutcome {
                        failures,
                        event_errors,
                        ..retried
                    };
                }
                None => outcomes.push(retried),
            }
        }
        Ok(outcomes)
    }

    /// Writes `summary.json` and closes the event log for the run.
    pub fn finish(&self, outcomes: &[SlotOutcome]) -> anyhow::Result<RunSummary> {
        let by_slot: BTreeMap<ImageSlot, &SlotOutcome> = outcomes
            .iter()
            .map(|outcome| (outcome.slot, outcome))
            .collect();
        let assets: Vec<GeneratedAsset> = by_slot
            .values()
            .filter_map(|outcome| outcome.asset.clone())
            .collect();
        let missing: Vec<ImageSlot> = by_slot
            .values()
            .filter(|outcome| !outcome.is_produced())
            .map(|outcome| outcome.slot)
            .collect();
        let summary = RunSummary {
            run_id: self.run_id.clone(),
            theme: self.theme.clone(),
            started_at: self.started_at.clone(),
            finished_at: now_utc_iso(),
            requested: by_slot.len() as u64,
            produced: assets.len() as u64,
            assets,
            missing,
        };
        write_summary(&self.summary_path, &summary, None)
            .with_context(|| format!("failed writing {}", self.summary_path.display()))?;
        self.runner.events.emit(
            "run_finished",
            map_object(json!({
                "produced": summary.produced,
                "requested": summary.requested,
                "summary_path": self.summary_path.to_string_lossy().to_string(),
            })),
        )?;
        Ok(summary)
    }

    fn skip_second_pass(&self, reason: &str, wait: Duration) -> anyhow::Result<()> {
        self.runner.events.emit(
            "second_pass_skipped",
            map_object(json!({
                "reason": reason,
                "wait_s": wait.as_secs_f64(),
            })),
        )?;
        Ok(())
    }

    fn start(&self, slots: &[ImageSlot], mode: RunMode, enrichment: bool) -> anyhow::Result<()> {
        clear_assets(self.out_dir(), slots)?;
        self.runner.events.emit(
            "run_started",
            map_object(json!({
                "theme": self.theme,
                "out_dir": self.out_dir().to_string_lossy().to_string(),
                "slots": slots.iter().map(|slot| slot.id()).collect::<Vec<_>>(),
                "mode": mode.label(),
                "providers": self.provider_names(),
                "enrichment": enrichment,
            })),
        )?;
        Ok(())
    }

    fn pass(
        &self,
        prompts: &PromptSet,
        mode: RunMode,
        produced_before: usize,
        progress: &mut dyn FnMut(&SlotOutcome, usize),
    ) -> anyhow::Result<Vec<SlotOutcome>> {
        let mut produced = produced_before;
        let mut outcomes = Vec::with_capacity(prompts.len());
        match mode {
            RunMode::Sequential => {
                for (slot, prompt) in prompts.iter() {
                    let outcome = self.runner.run_slot_guarded(slot, prompt);
                    if outcome.is_produced() {
                        produced += 1;
                    }
                    progress(&outcome, produced);
                    outcomes.push(outcome);
                }
            }
            RunMode::Parallel { workers } => {
                let pool = ThreadPoolBuilder::new()
                    .num_threads(workers.max(1))
                    .thread_name(|index| format!("lander-slot-{index}"))
                    .build()
                    .context("failed to start slot worker pool")?;
                let (tx, rx) = mpsc::channel();
                for (slot, prompt) in prompts.iter() {
                    let runner = Arc::clone(&self.runner);
                    let tx = tx.clone();
                    let prompt = prompt.to_string();
                    pool.spawn(move || {
                        let _ = tx.send(runner.run_slot_guarded(slot, &prompt));
                    });
                }
                drop(tx);
                for outcome in rx {
                    if outcome.is_produced() {
                        produced += 1;
                    }
                    progress(&outcome, produced);
                    outcomes.push(outcome);
                }
            }
        }
        Ok(outcomes)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "slot job panicked".to_string())
}

fn map_object(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use lander_contracts::events::read_events;
    use lander_contracts::runs::summary::read_summary;
    use lander_contracts::slots::{ImageSlot, OutputFormat};

    use super::{LandingEngine, RunMode};
    use crate::config::EngineConfig;
    use crate::error::ProviderError;
    use crate::prompts::{EnrichmentClient, EnrichmentConfig, PromptBuilder};
    use crate::providers::{ImageProvider, ImageProviderRegistry, ProviderImage};
    use crate::testing::StubServer;

    fn scene_png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_fn(width, height, |x, y| {
            let inside = x > width / 4 && x < width * 3 / 4 && y > height / 4 && y < height * 3 / 4;
            if inside {
                Rgb([120, 70, 40])
            } else {
                Rgb([246, 244, 240])
            }
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image)
            .write_to(&mut out, ImageFormat::Png)
            .expect("encode fixture");
        out.into_inner()
    }

    enum Behaviour {
        Image,
        Timeout,
        Garbage,
        FailFirst(AtomicUsize),
        Panic,
    }

    struct FakeProvider {
        name: &'static str,
        behaviour: Behaviour,
        calls: CallLog,
    }

    type CallLog = Arc<Mutex<Vec<(ImageSlot, String)>>>;

    impl FakeProvider {
        fn boxed(name: &'static str, behaviour: Behaviour) -> (Box<dyn ImageProvider>, CallLog) {
            let calls = Arc::new(Mutex::new(Vec::new()));
            let provider = FakeProvider {
                name,
                behaviour,
                calls: Arc::clone(&calls),
            };
            (Box::new(provider), calls)
        }

        fn image(&self) -> ProviderImage {
            ProviderImage {
                bytes: scene_png(1200, 900),
                provider: self.name.to_string(),
                mime: Some("image/png".to_string()),
            }
        }
    }

    impl ImageProvider for FakeProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn attempt(&self, prompt: &str, slot: ImageSlot) -> Result<ProviderImage, ProviderError> {
            self.calls
                .lock()
                .expect("calls lock")
                .push((slot, prompt.to_string()));
            match &self.behaviour {
                Behaviour::Image => Ok(self.image()),
                Behaviour::Timeout => Err(ProviderError::Transport {
                    provider: self.name.to_string(),
                    detail: "operation timed out".to_string(),
                    retryable: true,
                }),
                Behaviour::Garbage => Ok(ProviderImage {
                    bytes: b"<html>rate limited</html>".to_vec(),
                    provider: self.name.to_string(),
                    mime: None,
                }),
                Behaviour::FailFirst(seen) => {
                    if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ProviderError::not_an_image(self.name, "warming up"))
                    } else {
                        Ok(self.image())
                    }
                }
                Behaviour::Panic => panic!("decoder blew up on {slot}"),
            }
        }
    }

    fn registry(providers: Vec<Box<dyn ImageProvider>>) -> ImageProviderRegistry {
        ImageProviderRegistry::new(providers)
    }

    #[test]
    fn coffee_shop_produces_every_slot_within_budget() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (primary, calls) = FakeProvider::boxed("pollinations", Behaviour::Image);
        let engine = LandingEngine::new(
            temp.path(),
            "coffee shop",
            &EngineConfig::default(),
            registry(vec![primary]),
        );
        let prompts = PromptBuilder::default().build_all("coffee shop", &ImageSlot::ALL);
        let mut seen = Vec::new();
        let outcomes = engine.run(&prompts, RunMode::Sequential, &mut |outcome, produced| {
            seen.push((outcome.slot, produced));
        })?;
        let summary = engine.finish(&outcomes)?;

        assert_eq!(summary.tally(), "8/8 produced");
        assert_eq!(seen.last().map(|(_, produced)| *produced), Some(8));
        assert_eq!(calls.lock().expect("calls lock").len(), 8);
        for slot in ImageSlot::ALL {
            let path = temp.path().join(slot.file_name());
            let bytes = std::fs::metadata(&path)?.len();
            assert!(bytes <= slot.byte_budget(), "{slot} is {bytes} bytes");
            let decoded = image::open(&path)?;
            assert_eq!((decoded.width(), decoded.height()), slot.dimensions());
        }
        let favicon = summary
            .assets
            .iter()
            .find(|asset| asset.slot == ImageSlot::Favicon)
            .expect("favicon asset");
        assert_eq!(favicon.mime, OutputFormat::Png.mime());
        assert!(temp.path().join("favicon.png").is_file());

        let events = read_events(engine.events_path())?;
        let kinds: Vec<&str> = events
            .iter()
            .filter_map(|event| event["type"].as_str())
            .collect();
        assert_eq!(kinds.first(), Some(&"run_started"));
        assert_eq!(kinds.last(), Some(&"run_finished"));
        assert_eq!(kinds.iter().filter(|kind| **kind == "slot_produced").count(), 8);
        assert_eq!(read_summary(engine.summary_path())?.produced, 8);
        Ok(())
    }

    #[test]
    fn primary_timeout_falls_back_to_stock_for_main() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (primary, primary_calls) = FakeProvider::boxed("pollinations", Behaviour::Timeout);
        let (stock, stock_calls) = FakeProvider::boxed("pexels", Behaviour::Image);
        let (spare, spare_calls) = FakeProvider::boxed("pixabay", Behaviour::Image);
        let engine = LandingEngine::new(
            temp.path(),
            "coffee shop",
            &EngineConfig::default(),
            registry(vec![primary, stock, spare]),
        );
        let prompts = PromptBuilder::default().templates("coffee shop", &[ImageSlot::Main]);
        let outcomes = engine.run(&prompts, RunMode::Sequential, &mut |_, _| {})?;

        let main = &outcomes[0];
        let asset = main.asset.as_ref().expect("main produced");
        assert_eq!(asset.provider, "pexels");
        assert_eq!(main.failures.len(), 1);
        assert_eq!(main.failures[0].provider, "pollinations");
        assert_eq!(main.failures[0].kind, "transport");
        assert_eq!(primary_calls.lock().expect("lock").len(), 1);
        assert_eq!(stock_calls.lock().expect("lock").len(), 1);
        assert!(spare_calls.lock().expect("lock").is_empty());
        assert!(temp.path().join("main.jpg").is_file());

        let events = read_events(engine.events_path())?;
        assert!(events.iter().any(|event| event["type"] == "provider_failed"
            && event["provider"] == "pollinations"
            && event["slot"] == "main"));
        Ok(())
    }

    #[test]
    fn undecodable_payload_moves_to_next_provider() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (primary, _) = FakeProvider::boxed("pollinations", Behaviour::Garbage);
        let (second, _) = FakeProvider::boxed("huggingface", Behaviour::Image);
        let engine = LandingEngine::new(
            temp.path(),
            "florist",
            &EngineConfig::default(),
            registry(vec![primary, second]),
        );
        let prompts = PromptBuilder::default().templates("florist", &[ImageSlot::Favicon]);
        let outcomes = engine.run(&prompts, RunMode::Sequential, &mut |_, _| {})?;
        assert_eq!(
            outcomes[0].asset.as_ref().map(|asset| asset.provider.as_str()),
            Some("huggingface")
        );
        assert_eq!(outcomes[0].failures[0].kind, "decode");
        Ok(())
    }

    #[test]
    fn exhausted_slots_are_reported_missing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        std::fs::write(temp.path().join("main.jpg"), b"stale")?;
        let (primary, _) = FakeProvider::boxed("pollinations", Behaviour::Timeout);
        let engine = LandingEngine::new(
            temp.path(),
            "bakery",
            &EngineConfig::default(),
            registry(vec![primary]),
        );
        let prompts = PromptBuilder::default().templates("bakery", &[ImageSlot::Main]);
        let outcomes = engine.run(&prompts, RunMode::Sequential, &mut |_, _| {})?;
        let summary = engine.finish(&outcomes)?;

        assert!(!summary.is_complete());
        assert_eq!(summary.missing, vec![ImageSlot::Main]);
        assert!(!temp.path().join("main.jpg").exists());
        Ok(())
    }

    #[test]
    fn parallel_mode_collects_every_slot() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (primary, calls) = FakeProvider::boxed("pollinations", Behaviour::Image);
        let engine = LandingEngine::new(
            temp.path(),
            "coffee shop",
            &EngineConfig::default(),
            registry(vec![primary]),
        );
        let prompts = PromptBuilder::default().templates("coffee shop", &ImageSlot::ALL);
        let mut totals = Vec::new();
        let outcomes = engine.run(
            &prompts,
            RunMode::Parallel { workers: 3 },
            &mut |_, produced| totals.push(produced),
        )?;

        assert_eq!(outcomes.len(), 8);
        assert_eq!(totals, (1..=8).collect::<Vec<_>>());
        assert_eq!(calls.lock().expect("lock").len(), 8);
        let summary = engine.finish(&outcomes)?;
        assert_eq!(summary.tally(), "8/8 produced");
        let slots: Vec<ImageSlot> = summary.assets.iter().map(|asset| asset.slot).collect();
        assert_eq!(slots, ImageSlot::ALL.to_vec());
        Ok(())
    }

    fn enriching_builder(base_url: &str) -> PromptBuilder {
        PromptBuilder::new(EnrichmentClient::new(EnrichmentConfig {
            enabled: true,
            base_url: base_url.to_string(),
            connect_timeout_s: 1.0,
            timeout_s: 5.0,
            ..EnrichmentConfig::default()
        }))
    }

    #[test]
    fn second_pass_retries_missing_slots_with_enriched_prompt() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let server = StubServer::start(
            200,
            "application/json",
            r#"{"response": "Sunrise sourdough loaves on a flour dusted oak counter"}"#,
        )?;
        let (primary, calls) =
            FakeProvider::boxed("pollinations", Behaviour::FailFirst(AtomicUsize::new(0)));
        let engine = LandingEngine::new(
            temp.path(),
            "bakery",
            &EngineConfig::default(),
            registry(vec![primary]),
        );
        let builder = enriching_builder(&server.base_url);
        let outcomes = engine.run_with_enrichment(
            &builder,
            &[ImageSlot::Main],
            RunMode::Sequential,
            Duration::from_secs(20),
            &mut |_, _| {},
        )?;

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_produced());
        assert_eq!(outcomes[0].failures.len(), 1);
        let calls = calls.lock().expect("lock").clone();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, builder.template("bakery", ImageSlot::Main));
        assert_ne!(calls[1].1, calls[0].1);
        assert!(calls[1].1.starts_with("Sunrise sourdough"));
        let events = read_events(engine.events_path())?;
        assert!(events
            .iter()
            .any(|event| event["type"] == "second_pass_started"));
        Ok(())
    }

    #[test]
    fn failed_enrichment_skips_the_second_pass() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (primary, calls) = FakeProvider::boxed("pollinations", Behaviour::Timeout);
        let engine = LandingEngine::new(
            temp.path(),
            "bakery",
            &EngineConfig::default(),
            registry(vec![primary]),
        );
        // Nothing listens on port 9.
        let outcomes = engine.run_with_enrichment(
            &enriching_builder("http://127.0.0.1:9"),
            &[ImageSlot::Main],
            RunMode::Sequential,
            Duration::from_secs(20),
            &mut |_, _| {},
        )?;

        assert!(!outcomes[0].is_produced());
        assert_eq!(calls.lock().expect("lock").len(), 1);
        let events = read_events(engine.events_path())?;
        assert!(!events
            .iter()
            .any(|event| event["type"] == "second_pass_started"));
        assert!(events.iter().any(|event| event["type"] == "second_pass_skipped"
            && event["reason"] == "enrichment produced no new prompts"));
        Ok(())
    }

    #[test]
    fn panicking_slot_job_becomes_missing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (primary, _) = FakeProvider::boxed("pollinations", Behaviour::Panic);
        let engine = LandingEngine::new(
            temp.path(),
            "bakery",
            &EngineConfig::default(),
            registry(vec![primary]),
        );
        let slots = [ImageSlot::Main, ImageSlot::About1];
        let prompts = PromptBuilder::default().templates("bakery", &slots);
        for mode in [RunMode::Sequential, RunMode::Parallel { workers: 2 }] {
            let outcomes = engine.run(&prompts, mode, &mut |_, _| {})?;
            assert_eq!(outcomes.len(), 2);
            for outcome in &outcomes {
                assert!(!outcome.is_produced());
                assert_eq!(outcome.failures[0].kind, "panic");
                assert!(outcome.failures[0].message.contains("decoder blew up"));
            }
        }
        let outcomes = engine.run(&prompts, RunMode::Sequential, &mut |_, _| {})?;
        assert_eq!(engine.finish(&outcomes)?.missing, slots.to_vec());
        Ok(())
    }

    #[test]
    fn event_log_failures_are_recorded_on_the_outcome() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (primary, _) = FakeProvider::boxed("pollinations", Behaviour::Image);
        let engine = LandingEngine::new(
            temp.path(),
            "bakery",
            &EngineConfig::default(),
            registry(vec![primary]),
        );
        // A directory where the log file should be makes every append fail.
        std::fs::create_dir_all(engine.events_path())?;
        let outcome = engine.runner.run_slot(ImageSlot::Main, "bakery storefront");

        assert!(outcome.is_produced());
        assert_eq!(outcome.event_errors.len(), 2);
        assert!(outcome.event_errors[0].starts_with("slot_started"));
        assert!(outcome.event_errors[1].starts_with("slot_produced"));
        Ok(())
    }

    #[test]
    fn without_enrichment_there_is_no_second_pass() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (primary, calls) = FakeProvider::boxed("pollinations", Behaviour::Timeout);
        let engine = LandingEngine::new(
            temp.path(),
            "bakery",
            &EngineConfig::default(),
            registry(vec![primary]),
        );
        let outcomes = engine.run_with_enrichment(
            &PromptBuilder::default(),
            &[ImageSlot::Main, ImageSlot::About1],
            RunMode::Parallel { workers: 2 },
            Duration::from_millis(10),
            &mut |_, _| {},
        )?;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|outcome| !outcome.is_produced()));
        assert_eq!(calls.lock().expect("lock").len(), 2);
        Ok(())
    }

    #[test]
    fn requested_provider_leads_the_chain() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (primary, primary_calls) = FakeProvider::boxed("pollinations", Behaviour::Image);
        let (stock, _) = FakeProvider::boxed("pixabay", Behaviour::Image);
        let engine = LandingEngine::new(
            temp.path(),
            "gym",
            &EngineConfig::default(),
            registry(vec![primary, stock]),
        )
        .with_requested_provider(Some("pixabay".to_string()));
        let prompts = PromptBuilder::default().templates("gym", &[ImageSlot::About2]);
        let outcomes = engine.run(&prompts, RunMode::Sequential, &mut |_, _| {})?;
        assert_eq!(
            outcomes[0].asset.as_ref().map(|asset| asset.provider.as_str()),
            Some("pixabay")
        );
        assert!(primary_calls.lock().expect("lock").is_empty());
        Ok(())
    }
}
