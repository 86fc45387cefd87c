use rand::Rng;
use serde::Deserialize;
use shared::{Difficulty, UpcycleIdea};
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Unknown category: {0}")]
    NotFound(String),
    #[error("Catalog has no categories")]
    Empty,
    #[error("Duplicate category: {0}")]
    DuplicateKey(String),
    #[error("Category {key} has reward range {min}..={max}")]
    InvalidRewardRange { key: String, min: u32, max: u32 },
    #[error("Category {0} has no sample item names")]
    NoSampleItems(String),
    #[error("Failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse catalog file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RewardRange {
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryProfile {
    pub category_key: String,
    pub material: String,
    pub reward_range: RewardRange,
    pub recyclable: bool,
    pub recycle_info: String,
    pub sample_item_names: Vec<String>,
    #[serde(default)]
    pub upcycle_ideas: Vec<UpcycleIdea>,
}

impl CategoryProfile {
    /// Name shown to clients, e.g. "electronics" becomes "Electronics".
    pub fn display_name(&self) -> String {
        capitalize(&self.category_key)
    }
}

pub fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Immutable category reference data, built once at startup and shared by reference.
///
/// Profiles are kept sorted by key so a seeded random source always walks the
/// same order.
#[derive(Debug, Clone)]
pub struct CategoryCatalog {
    profiles: Vec<CategoryProfile>,
}

impl CategoryCatalog {
    pub fn new(mut profiles: Vec<CategoryProfile>) -> Result<Self, CatalogError> {
        if profiles.is_empty() {
            return Err(CatalogError::Empty);
        }
        profiles.sort_by(|a, b| a.category_key.cmp(&b.category_key));

        let mut seen = BTreeSet::new();
        for profile in &profiles {
            if !seen.insert(profile.category_key.as_str()) {
                return Err(CatalogError::DuplicateKey(profile.category_key.clone()));
            }
            let range = profile.reward_range;
            if range.min > range.max {
                return Err(CatalogError::InvalidRewardRange {
                    key: profile.category_key.clone(),
                    min: range.min,
                    max: range.max,
                });
            }
            if profile.sample_item_names.is_empty() {
                return Err(CatalogError::NoSampleItems(profile.category_key.clone()));
            }
        }

        Ok(Self { profiles })
    }

    pub fn from_yaml_str(source: &str) -> Result<Self, CatalogError> {
        let profiles: Vec<CategoryProfile> = serde_yaml::from_str(source)?;
        Self::new(profiles)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let source = std::fs::read_to_string(path)?;
        let catalog = Self::from_yaml_str(&source)?;
        log::info!(
            "Loaded {} categories from {}",
            catalog.profiles.len(),
            path.display()
        );
        Ok(catalog)
    }

    pub fn lookup(&self, category_key: &str) -> Result<&CategoryProfile, CatalogError> {
        self.profiles
            .iter()
            .find(|profile| profile.category_key == category_key)
            .ok_or_else(|| CatalogError::NotFound(category_key.to_string()))
    }

    pub fn list_keys(&self) -> BTreeSet<&str> {
        self.profiles
            .iter()
            .map(|profile| profile.category_key.as_str())
            .collect()
    }

    /// Picks one profile uniformly at random.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> &CategoryProfile {
        // `new` rejects empty catalogs, so the range is never empty.
        let index = rng.random_range(0..self.profiles.len());
        &self.profiles[index]
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// The reference data the service ships with.
    pub fn builtin() -> Self {
        Self {
            profiles: vec![
                CategoryProfile {
                    category_key: "clothing".into(),
                    material: "Fabric".into(),
                    reward_range: RewardRange { min: 20, max: 80 },
                    recyclable: true,
                    recycle_info: "Textile recycling or donation".into(),
                    sample_item_names: names(&[
                        "Denim Jacket",
                        "Vintage T-Shirt",
                        "Wool Sweater",
                        "Designer Scarf",
                    ]),
                    upcycle_ideas: vec![idea(
                        "T-Shirt Tote Bag",
                        "No-sew conversion to a grocery bag",
                        Difficulty::Easy,
                        "https://images.unsplash.com/photo-1544816155-12df9643f363?w=200&h=200&fit=crop",
                    )],
                },
                CategoryProfile {
                    category_key: "electronics".into(),
                    material: "Plastic & Electronics".into(),
                    reward_range: RewardRange { min: 40, max: 150 },
                    recyclable: true,
                    recycle_info: "E-waste recycling required".into(),
                    sample_item_names: names(&[
                        "Bluetooth Speaker",
                        "Old Tablet",
                        "Mechanical Keyboard",
                        "Gaming Mouse",
                        "Digital Camera",
                    ]),
                    upcycle_ideas: vec![
                        idea(
                            "Speaker Bluetooth Mod",
                            "Convert old headphones into a portable Bluetooth speaker",
                            Difficulty::Hard,
                            "https://images.unsplash.com/photo-1545454675-3531b543be5d?w=200&h=200&fit=crop",
                        ),
                        idea(
                            "Tech Art Frame",
                            "Create modern wall art by mounting in a shadow box",
                            Difficulty::Medium,
                            "https://images.unsplash.com/photo-1505740420928-5e560c06d30e?w=200&h=200&fit=crop",
                        ),
                    ],
                },
                CategoryProfile {
                    category_key: "furniture".into(),
                    material: "Wood".into(),
                    reward_range: RewardRange { min: 50, max: 200 },
                    recyclable: false,
                    recycle_info: "Bulk item pickup".into(),
                    sample_item_names: names(&[
                        "Wooden Chair",
                        "Coffee Table",
                        "Antique Lamp",
                        "Bookshelf",
                    ]),
                    upcycle_ideas: vec![idea(
                        "Chalk Paint Restoration",
                        "Give it a modern look with matte paint",
                        Difficulty::Easy,
                        "https://images.unsplash.com/photo-1555041469-a586c61ea9bc?w=200&h=200&fit=crop",
                    )],
                },
                CategoryProfile {
                    category_key: "other".into(),
                    material: "Mixed Materials".into(),
                    reward_range: RewardRange { min: 10, max: 40 },
                    recyclable: false,
                    recycle_info: "Check local guidelines".into(),
                    sample_item_names: names(&[
                        "Ceramic Mug",
                        "Glass Vase",
                        "Board Game",
                        "Yoga Mat",
                    ]),
                    upcycle_ideas: vec![idea(
                        "Planter Conversion",
                        "Drill a hole and use as a plant pot",
                        Difficulty::Easy,
                        "https://images.unsplash.com/photo-1485955900006-10f4d324d411?w=200&h=200&fit=crop",
                    )],
                },
            ],
        }
    }
}

fn names(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

fn idea(title: &str, description: &str, difficulty: Difficulty, thumbnail: &str) -> UpcycleIdea {
    UpcycleIdea {
        title: title.into(),
        description: description.into(),
        difficulty_level: difficulty,
        thumbnail_ref: thumbnail.into(),
        source_tag: "youtube".into(),
    }
}
