//! The validated in-memory configuration the mechanics consume.
//! Loaded from a JSON file; unknown top-level keys are warned about and
//! discarded, malformed types are fatal. Every knob has a default so the
//! server also runs without a config file at all.

use crate::errors::ConfigError;
use protocol::CharacterType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// The complete server configuration.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct GameConfig {
    /// Global game parameters.
    pub game: GameSection,
    /// Parameters for neutral world generation.
    pub worlds: WorldsSection,
    /// Artifact catalogue for map seeding.
    pub artifacts: ArtifactsSection,
    /// Per-character overrides. Characters not listed use their built-in defaults.
    pub characters: BTreeMap<CharacterType, CharacterMods>,
}

/// Global game parameters.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct GameSection {
    /// Amount of worlds on the map.
    pub map_size: u16,
    /// Amount of fleet keys in the game. Keys are reclaimed on loss, never destroyed.
    pub num_keys: u16,
    /// Turn duration in seconds when no player preference is known yet.
    pub default_turn_duration: u64,
    /// Lower clamp for the computed turn duration in seconds.
    pub min_turn_duration: u64,
    /// Upper clamp for the computed turn duration in seconds.
    pub max_turn_duration: u64,
    /// First player to reach this score wins.
    pub default_target_score: i64,
    /// Fraction of worlds flagged as black holes.
    pub black_hole_fraction: f64,
    /// Metal produced per effective mine each production phase.
    pub metal_per_mine: u32,
    /// Population growth per production phase, as a fraction of current population.
    pub growth_rate: f64,
    /// Seed for map generation and respawn placement. Persisted with the snapshot.
    pub rng_seed: u64,
    /// Resources every homeworld starts with.
    pub homeworld: HomeworldSection,
    /// Build and action costs.
    pub costs: CostsSection,
}

impl Default for GameSection {
    fn default() -> Self {
        GameSection {
            map_size: 255,
            num_keys: 255,
            default_turn_duration: 3600,
            min_turn_duration: 300,
            max_turn_duration: 86400,
            default_target_score: 8000,
            black_hole_fraction: 0.04,
            metal_per_mine: 1,
            growth_rate: 0.1,
            rng_seed: 0x5747_4f4e,
            homeworld: HomeworldSection::default(),
            costs: CostsSection::default(),
        }
    }
}

/// What one unit of something costs a world.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default)]
#[serde(default)]
pub struct ResourceCost {
    pub industry: u32,
    pub metal: u32,
    pub population: u32,
}

impl ResourceCost {
    /// Applies a per-unit discount to every nonzero component.
    pub fn discounted(self, discount: u32) -> ResourceCost {
        let cut = |value: u32| {
            if value == 0 { 0 } else { value.saturating_sub(discount).max(1) }
        };
        ResourceCost {
            industry: cut(self.industry),
            metal: cut(self.metal),
            population: cut(self.population),
        }
    }
}

/// The cost table of the build and action mechanics.
#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
#[serde(default)]
pub struct CostsSection {
    /// One iship, pship or fleet ship.
    pub ship: ResourceCost,
    /// One industry unit.
    pub industry_unit: ResourceCost,
    /// One point of population limit.
    pub limit_unit: ResourceCost,
    /// One robot build (yields `robot_yield` robots).
    pub robot_unit: ResourceCost,
    /// Robots produced per robot build.
    pub robot_yield: u32,
    /// Per-migrant cost at the source world.
    pub migration: ResourceCost,
    /// Minimum fleet size to assemble a planet buster.
    pub pbb_min_ships: u32,
    /// Metal recovered per scrapped garrison ship.
    pub scrap_metal_per_ship: u32,
}

impl Default for CostsSection {
    fn default() -> Self {
        CostsSection {
            ship: ResourceCost { industry: 1, metal: 1, population: 1 },
            industry_unit: ResourceCost { industry: 5, metal: 5, population: 5 },
            limit_unit: ResourceCost { industry: 5, metal: 5, population: 0 },
            robot_unit: ResourceCost { industry: 1, metal: 1, population: 0 },
            robot_yield: 2,
            migration: ResourceCost { industry: 1, metal: 1, population: 0 },
            pbb_min_ships: 25,
            scrap_metal_per_ship: 1,
        }
    }
}

/// The starting package a player receives on JOIN.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct HomeworldSection {
    pub population: u32,
    pub industry: u32,
    pub mines: u32,
    pub metal: u32,
    pub limit: u32,
    /// Ships each starting fleet carries.
    pub ships_per_fleet: u32,
    /// Amount of fleets allocated on join.
    pub num_fleets: u16,
}

impl Default for HomeworldSection {
    fn default() -> Self {
        HomeworldSection {
            population: 25,
            industry: 15,
            mines: 5,
            metal: 10,
            limit: 50,
            ships_per_fleet: 10,
            num_fleets: 3,
        }
    }
}

/// Value ranges for neutral world generation. Every range is inclusive
/// and serialized as a two-element array `[min, max]`.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct WorldsSection {
    pub industry_range: (u32, u32),
    pub mines_range: (u32, u32),
    pub population_range: (u32, u32),
    pub limit_range: (u32, u32),
    /// Minimal amount of neighbors per world.
    pub min_connections: usize,
    /// Maximal amount of neighbors per world.
    pub max_connections: usize,
}

impl Default for WorldsSection {
    fn default() -> Self {
        WorldsSection {
            industry_range: (0, 10),
            mines_range: (0, 8),
            population_range: (0, 20),
            limit_range: (20, 60),
            min_connections: 2,
            max_connections: 4,
        }
    }
}

/// The artifact catalogue. `types` and `items` are combined into
/// generated names (`"Ancient Orb"`), the special list is taken as is.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ArtifactsSection {
    pub types: Vec<String>,
    pub items: Vec<String>,
    pub special_artifacts: Vec<SpecialArtifact>,
    /// Points for a generated (non-special) artifact.
    pub default_points: i64,
}

impl Default for ArtifactsSection {
    fn default() -> Self {
        ArtifactsSection {
            types: vec![
                "Ancient".into(),
                "Crystal".into(),
                "Golden".into(),
                "Living".into(),
            ],
            items: vec!["Orb".into(), "Crown".into(), "Tablet".into(), "Engine".into()],
            special_artifacts: Vec::new(),
            default_points: 10,
        }
    }
}

/// A hand-placed artifact with its own point value and a reserved
/// effect tag. The effect is metadata only, mechanics ignore it.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SpecialArtifact {
    pub name: String,
    pub points: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
}

/// Mechanical knobs of one character class.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct CharacterMods {
    /// Discount on industry and limit build costs.
    pub industry_bonus: u32,
    /// Cargo units one ship can carry.
    pub cargo_capacity_multiplier: u32,
    /// Local ship ratio that triggers automatic fleet capture.
    pub capture_ratio: u32,
}

impl Default for CharacterMods {
    fn default() -> Self {
        CharacterMods {
            industry_bonus: 0,
            cargo_capacity_multiplier: 1,
            capture_ratio: 0,
        }
    }
}

impl CharacterMods {
    /// The built-in per-character defaults used when the config does not
    /// override a class.
    pub fn defaults_for(character: CharacterType) -> CharacterMods {
        match character {
            CharacterType::EmpireBuilder => CharacterMods {
                industry_bonus: 1,
                ..CharacterMods::default()
            },
            CharacterType::Merchant => CharacterMods {
                cargo_capacity_multiplier: 2,
                ..CharacterMods::default()
            },
            CharacterType::Pirate => CharacterMods {
                capture_ratio: 3,
                ..CharacterMods::default()
            },
            _ => CharacterMods::default(),
        }
    }
}

impl GameConfig {
    /// The effective mods for a character: config override or built-in default.
    pub fn character_mods(&self, character: CharacterType) -> CharacterMods {
        self.characters
            .get(&character)
            .cloned()
            .unwrap_or_else(|| CharacterMods::defaults_for(character))
    }

    /// Cargo units one ship of this character's fleets can carry.
    pub fn cargo_per_ship(&self, character: CharacterType) -> u32 {
        self.character_mods(character).cargo_capacity_multiplier
    }

    /// Parses a config from JSON text. Unknown top-level keys are logged
    /// and dropped; anything else malformed is an error.
    pub fn from_json(text: &str) -> Result<GameConfig, ConfigError> {
        let mut raw: serde_json::Value =
            serde_json::from_str(text).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        let Some(map) = raw.as_object_mut() else {
            return Err(ConfigError::Malformed(
                "configuration root must be a JSON object".into(),
            ));
        };
        map.retain(|key, _| {
            let known = matches!(key.as_str(), "game" | "worlds" | "artifacts" | "characters");
            if !known {
                tracing::warn!(key, "Ignoring unknown configuration key.");
            }
            known
        });
        let config: GameConfig =
            serde_json::from_value(raw).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the config file, falling back to defaults when it is absent.
    pub async fn load_or_default(path: &Path) -> Result<GameConfig, ConfigError> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => GameConfig::from_json(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No config file, using defaults.");
                Ok(GameConfig::default())
            }
            Err(e) => Err(ConfigError::Io(e.to_string())),
        }
    }

    /// Range and consistency checks beyond what serde can express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.game.map_size == 0 {
            return Err(ConfigError::Invalid("game.map_size must be positive".into()));
        }
        if self.game.num_keys == 0 {
            return Err(ConfigError::Invalid("game.num_keys must be positive".into()));
        }
        if self.game.min_turn_duration > self.game.max_turn_duration {
            return Err(ConfigError::Invalid(
                "game.min_turn_duration exceeds game.max_turn_duration".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.game.black_hole_fraction) {
            return Err(ConfigError::Invalid(
                "game.black_hole_fraction must be in [0, 1)".into(),
            ));
        }
        if self.worlds.min_connections == 0 {
            return Err(ConfigError::Invalid(
                "worlds.min_connections must be at least 1".into(),
            ));
        }
        if self.worlds.min_connections > self.worlds.max_connections {
            return Err(ConfigError::Invalid(
                "worlds.min_connections exceeds worlds.max_connections".into(),
            ));
        }
        if self.worlds.max_connections >= self.game.map_size as usize {
            return Err(ConfigError::Invalid(
                "worlds.max_connections must be below game.map_size".into(),
            ));
        }
        for (name, (min, max)) in [
            ("worlds.industry_range", self.worlds.industry_range),
            ("worlds.mines_range", self.worlds.mines_range),
            ("worlds.population_range", self.worlds.population_range),
            ("worlds.limit_range", self.worlds.limit_range),
        ] {
            if min > max {
                return Err(ConfigError::Invalid(format!("{name} has min above max")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        GameConfig::default().validate().unwrap();
    }

    #[test]
    fn unknown_top_level_key_is_dropped() {
        let config =
            GameConfig::from_json(r#"{"game":{"map_size":40},"reverse_proxy":{"port":1}}"#)
                .unwrap();
        assert_eq!(config.game.map_size, 40);
        // Everything not overridden keeps its default.
        assert_eq!(config.game.default_target_score, 8000);
    }

    #[test]
    fn malformed_type_is_fatal() {
        let result = GameConfig::from_json(r#"{"game":{"map_size":"lots"}}"#);
        assert!(matches!(result, Err(ConfigError::Malformed(_))));
    }

    #[test]
    fn inconsistent_ranges_are_rejected() {
        let result = GameConfig::from_json(r#"{"worlds":{"industry_range":[9,3]}}"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn character_mods_fall_back_to_built_ins() {
        let config = GameConfig::default();
        assert_eq!(config.cargo_per_ship(CharacterType::Merchant), 2);
        assert_eq!(config.cargo_per_ship(CharacterType::Pirate), 1);
        assert_eq!(
            config.character_mods(CharacterType::Pirate).capture_ratio,
            3
        );
        assert_eq!(
            config
                .character_mods(CharacterType::EmpireBuilder)
                .industry_bonus,
            1
        );
    }
}
