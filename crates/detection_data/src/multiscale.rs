use crate::error::GeneratorError;
use anyhow::{ensure, Result};
use rand::seq::IndexedRandom;
use rand::{rngs::StdRng, SeedableRng};

/// Candidate sides used when no explicit set is configured.
pub const DEFAULT_MULTI_IMAGE_SIZES: [u32; 10] = [320, 352, 384, 416, 448, 480, 512, 544, 576, 608];

/// Number of consecutive accesses that share one drawn size.
pub const RESCALE_PERIOD: usize = 10;

/// Chooses the letterbox side for each batch access.
///
/// When enabled, a new side is drawn uniformly from `sizes` on accesses
/// `0, 10, 20, ...` and kept for the following ten accesses, so consumers
/// that cache compiled shapes see a stable shape for ten batches at a time.
/// When disabled, every access returns the base size.
///
/// The controller owns its random generator; whoever drives the accesses
/// owns the controller, so draws never race across threads.
#[derive(Debug, Clone)]
pub struct MultiScaleController {
    enabled: bool,
    sizes: Vec<u32>,
    current: u32,
    accesses: usize,
    rng: StdRng,
}

impl MultiScaleController {
    pub fn new(base_size: u32, enabled: bool, sizes: Vec<u32>, seed: u64) -> Result<Self> {
        ensure!(
            base_size > 0,
            GeneratorError::config("image_size must be positive")
        );
        if enabled {
            ensure!(
                !sizes.is_empty(),
                GeneratorError::config("multi_scale is enabled but multi_image_sizes is empty")
            );
            ensure!(
                sizes.iter().all(|&s| s > 0),
                GeneratorError::config(format!(
                    "multi_image_sizes must be positive (got {:?})",
                    sizes
                ))
            );
        }
        Ok(Self {
            enabled,
            sizes,
            current: base_size,
            accesses: 0,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// A controller that always returns `size`.
    pub fn fixed(size: u32) -> Result<Self> {
        Self::new(size, false, Vec::new(), 0)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Registers one access and returns the side to use for it.
    pub fn next_size(&mut self) -> u32 {
        if self.enabled && self.accesses % RESCALE_PERIOD == 0 {
            if let Some(&size) = self.sizes.choose(&mut self.rng) {
                self.current = size;
            }
        }
        self.accesses += 1;
        self.current
    }

    /// Side used by the most recent access.
    pub fn current_size(&self) -> u32 {
        self.current
    }

    /// Number of accesses registered so far.
    pub fn accesses(&self) -> usize {
        self.accesses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_keeps_base_size() -> Result<()> {
        let mut ctrl = MultiScaleController::new(416, false, DEFAULT_MULTI_IMAGE_SIZES.to_vec(), 1)?;
        assert!((0..25).all(|_| ctrl.next_size() == 416));
        Ok(())
    }

    #[test]
    fn test_size_is_stable_within_each_period() -> Result<()> {
        let mut ctrl = MultiScaleController::new(416, true, DEFAULT_MULTI_IMAGE_SIZES.to_vec(), 3)?;
        let sizes: Vec<u32> = (0..40).map(|_| ctrl.next_size()).collect();

        for chunk in sizes.chunks(RESCALE_PERIOD) {
            assert!(chunk.iter().all(|&s| s == chunk[0]), "{:?}", chunk);
            assert!(DEFAULT_MULTI_IMAGE_SIZES.contains(&chunk[0]));
        }
        assert_eq!(ctrl.accesses(), 40);
        Ok(())
    }

    #[test]
    fn test_same_seed_same_schedule() -> Result<()> {
        let sizes = DEFAULT_MULTI_IMAGE_SIZES.to_vec();
        let mut a = MultiScaleController::new(416, true, sizes.clone(), 9)?;
        let mut b = MultiScaleController::new(416, true, sizes, 9)?;
        let sa: Vec<u32> = (0..50).map(|_| a.next_size()).collect();
        let sb: Vec<u32> = (0..50).map(|_| b.next_size()).collect();
        assert_eq!(sa, sb);
        Ok(())
    }

    #[test]
    fn test_enabled_without_sizes_is_rejected() {
        assert!(MultiScaleController::new(416, true, vec![], 0).is_err());
    }
}
