//! Lazily initialized, process-wide classifier slots (one per modality).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Instant;

use crate::classifier::Classifier;
use crate::error::Result;
use crate::media::Modality;

/// Builds the classifier for a modality. Called at most once per successful init.
pub trait ModelLoader: Send + Sync {
    fn load(&self, modality: Modality) -> Result<Arc<dyn Classifier>>;
}

type Slot = Mutex<Option<Arc<dyn Classifier>>>;

pub struct ModelRegistry {
    loader: Box<dyn ModelLoader>,
    image: Slot,
    video: Slot,
    audio: Slot,
}

impl ModelRegistry {
    pub fn new(loader: impl ModelLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            image: Mutex::new(None),
            video: Mutex::new(None),
            audio: Mutex::new(None),
        }
    }

    fn slot(&self, modality: Modality) -> &Slot {
        match modality {
            Modality::Image => &self.image,
            Modality::Video => &self.video,
            Modality::Audio => &self.audio,
        }
    }

    // The slot is only written after a successful load, so a poisoned guard
    // still holds a consistent value.
    fn lock(&self, modality: Modality) -> MutexGuard<'_, Option<Arc<dyn Classifier>>> {
        self.slot(modality)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the classifier for `modality`, loading it on first use.
    ///
    /// Blocking: the slot lock is held across the load so concurrent first
    /// callers wait and then share the single instance.
    pub fn get_or_init(&self, modality: Modality) -> Result<Arc<dyn Classifier>> {
        let mut slot = self.lock(modality);
        if let Some(classifier) = slot.as_ref() {
            return Ok(Arc::clone(classifier));
        }

        log::info!("[registry] Initializing {} classifier", modality);
        let started = Instant::now();
        let classifier = self.loader.load(modality).inspect_err(|e| {
            log::error!("[registry] {} classifier failed to load: {}", modality, e);
        })?;
        log::info!(
            "[registry] {} classifier '{}' ready in {:?}",
            modality,
            classifier.name(),
            started.elapsed()
        );

        *slot = Some(Arc::clone(&classifier));
        Ok(classifier)
    }

    /// Modalities whose classifier is currently loaded.
    /// Never blocks; a modality that is mid-load is reported as not loaded.
    pub fn loaded(&self) -> Vec<Modality> {
        Modality::ALL
            .into_iter()
            .filter(|m| match self.slot(*m).try_lock() {
                Ok(slot) => slot.is_some(),
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().is_some(),
                Err(TryLockError::WouldBlock) => false,
            })
            .collect()
    }

    /// Warm up the given modalities. Blocking.
    pub fn preload(&self, modalities: &[Modality]) -> Result<()> {
        for modality in modalities {
            self.get_or_init(*modality)?;
        }
        Ok(())
    }
}
