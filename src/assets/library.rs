use super::{AssetLoader, LoadError, ModelDefinition, ModelInstance};
use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub enum ModelSlot {
    Loading,
    Ready(Arc<ModelDefinition>),
    Failed(LoadError),
}

impl ModelSlot {
    pub fn is_loading(&self) -> bool {
        matches!(self, ModelSlot::Loading)
    }
}

/// A finished load, reported once by [`ModelLibrary::pump`].
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub url: String,
    pub result: Result<Arc<ModelDefinition>, LoadError>,
}

struct LoadJob {
    url: String,
}

struct LoadResult {
    url: String,
    data: Result<ModelDefinition, LoadError>,
}

struct ModelLoadWorker {
    tx: mpsc::Sender<LoadJob>,
    rx: mpsc::Receiver<LoadResult>,
}

impl ModelLoadWorker {
    fn new(loader: Arc<dyn AssetLoader>) -> Option<Self> {
        let (tx, rx) = mpsc::channel::<LoadJob>();
        let (result_tx, result_rx) = mpsc::channel();
        let builder = thread::Builder::new().name("model-loader".to_string());
        match builder.spawn(move || {
            while let Ok(job) = rx.recv() {
                let data = loader.load(&job.url);
                if result_tx.send(LoadResult { url: job.url, data }).is_err() {
                    break;
                }
            }
        }) {
            Ok(_) => Some(Self { tx, rx: result_rx }),
            Err(err) => {
                log::error!(target: "assets", "failed to spawn model loader worker: {err:?}");
                None
            }
        }
    }

    fn submit(&self, job: LoadJob) -> Result<(), LoadJob> {
        self.tx.send(job).map_err(|err| err.0)
    }

    fn drain(&self) -> Vec<LoadResult> {
        let mut results = Vec::new();
        while let Ok(result) = self.rx.try_recv() {
            results.push(result);
        }
        results
    }
}

/// URL-keyed cache of loaded definitions. Each URL is loaded once and shared by every placement;
/// loads run on a background worker and land on the caller's thread through [`ModelLibrary::pump`].
pub struct ModelLibrary {
    loader: Arc<dyn AssetLoader>,
    worker: Option<ModelLoadWorker>,
    slots: HashMap<String, ModelSlot>,
    finished: Vec<LoadOutcome>,
}

impl ModelLibrary {
    pub fn new(loader: Arc<dyn AssetLoader>) -> Self {
        let worker = ModelLoadWorker::new(Arc::clone(&loader));
        Self { loader, worker, slots: HashMap::new(), finished: Vec::new() }
    }

    pub fn slot(&self, url: &str) -> Option<&ModelSlot> {
        self.slots.get(url)
    }

    pub fn definition(&self, url: &str) -> Option<Arc<ModelDefinition>> {
        match self.slots.get(url) {
            Some(ModelSlot::Ready(definition)) => Some(Arc::clone(definition)),
            _ => None,
        }
    }

    pub fn instantiate(&self, url: &str) -> Option<ModelInstance> {
        self.definition(url).map(ModelInstance::new)
    }

    /// URLs whose load has not finished yet.
    pub fn loading_urls(&self) -> Vec<String> {
        self.slots.iter().filter(|(_, slot)| slot.is_loading()).map(|(url, _)| url.clone()).collect()
    }

    /// Starts loading `url` unless it is already cached or in flight.
    pub fn request(&mut self, url: &str) -> &ModelSlot {
        if !self.slots.contains_key(url) {
            self.start_load(url);
        }
        self.slots.entry(url.to_string()).or_insert(ModelSlot::Loading)
    }

    /// Drops a failed entry and submits the URL again.
    pub fn retry(&mut self, url: &str) {
        if matches!(self.slots.get(url), Some(ModelSlot::Failed(_))) {
            self.slots.remove(url);
            self.start_load(url);
        }
    }

    fn start_load(&mut self, url: &str) {
        self.slots.insert(url.to_string(), ModelSlot::Loading);
        let job = LoadJob { url: url.to_string() };
        let submitted = match &self.worker {
            Some(worker) => worker.submit(job),
            None => Err(job),
        };
        let job = match submitted {
            Ok(()) => {
                log::debug!(target: "assets", "queued load of '{url}'");
                return;
            }
            Err(job) => {
                if self.worker.take().is_some() {
                    log::warn!(target: "assets", "model loader worker is gone; loading '{url}' inline");
                }
                job
            }
        };
        let data = self.loader.load(&job.url);
        self.finish(LoadResult { url: job.url, data });
    }

    fn finish(&mut self, result: LoadResult) {
        let LoadResult { url, data } = result;
        let (slot, outcome) = match data {
            Ok(definition) => {
                let definition = Arc::new(definition);
                (ModelSlot::Ready(Arc::clone(&definition)), Ok(definition))
            }
            Err(err) => {
                log::warn!(target: "assets", "failed to load '{url}': {err}");
                (ModelSlot::Failed(err.clone()), Err(err))
            }
        };
        self.slots.insert(url.clone(), slot);
        self.finished.push(LoadOutcome { url, result: outcome });
    }

    /// Applies completed loads and returns them in completion order.
    pub fn pump(&mut self) -> Vec<LoadOutcome> {
        let results = self.worker.as_ref().map(ModelLoadWorker::drain).unwrap_or_default();
        for result in results {
            self.finish(result);
        }
        std::mem::take(&mut self.finished)
    }

    /// Blocks until `url` leaves the loading state or `timeout` elapses.
    pub fn wait_for(&mut self, url: &str, timeout: Duration) -> Option<&ModelSlot> {
        let deadline = Instant::now() + timeout;
        while self.slots.get(url).map(ModelSlot::is_loading).unwrap_or(false) {
            let Some(worker) = &self.worker else {
                break;
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match worker.rx.recv_timeout(remaining) {
                Ok(result) => self.finish(result),
                Err(mpsc::RecvTimeoutError::Timeout) => break,
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    self.worker = None;
                    break;
                }
            }
        }
        self.slots.get(url)
    }
}
