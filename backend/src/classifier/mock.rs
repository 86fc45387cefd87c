use crate::catalog::CategoryCatalog;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::ScanResult;
use std::sync::{Arc, Mutex, PoisonError};

pub const MOCK_CONDITION: &str = "Good";
pub const MOCK_CO2_SAVINGS_KG: f64 = 5.2;
const MIN_CONFIDENCE: f64 = 0.85;
const MAX_CONFIDENCE: f64 = 0.95;

/// Synthesizes a plausible scan result from the catalog when the model cannot answer.
pub struct MockClassifier<R = StdRng> {
    catalog: Arc<CategoryCatalog>,
    rng: Mutex<R>,
}

impl MockClassifier<StdRng> {
    /// Seeded classifiers repeat the same sequence of results; `None` draws from OS entropy.
    pub fn from_seed(catalog: Arc<CategoryCatalog>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self::new(catalog, rng)
    }
}

impl<R: Rng> MockClassifier<R> {
    pub fn new(catalog: Arc<CategoryCatalog>, rng: R) -> Self {
        Self {
            catalog,
            rng: Mutex::new(rng),
        }
    }

    pub fn classify(&self) -> ScanResult {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        generate(&self.catalog, &mut *rng)
    }
}

pub fn generate<R: Rng>(catalog: &CategoryCatalog, rng: &mut R) -> ScanResult {
    let profile = catalog.sample(rng);
    let names = &profile.sample_item_names;
    let object_name = names[rng.random_range(0..names.len())].clone();
    let confidence_score = rng.random_range(MIN_CONFIDENCE..MAX_CONFIDENCE);
    let estimated_reward =
        rng.random_range(profile.reward_range.min..=profile.reward_range.max);

    ScanResult {
        object_name,
        category: profile.display_name(),
        material: profile.material.clone(),
        condition: MOCK_CONDITION.to_string(),
        confidence_score,
        estimated_reward,
        co2_savings_kg: MOCK_CO2_SAVINGS_KG,
        upcycle_ideas: profile.upcycle_ideas.clone(),
        recyclable: profile.recyclable,
        recycle_info: profile.recycle_info.clone(),
    }
}
