//! Weapon catalog loading and validation.
#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use ballistics::BallisticsConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use weapon_ammo::AmmoSpec;

pub const CATALOG_VERSION: u32 = 1;
const MAX_SPREAD_DEG: f32 = 45.0;

const BUILTIN_CATALOG: &str = include_str!("../data/default_weapons.toml");

#[derive(Debug, thiserror::Error)]
pub enum WeaponDataError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse weapon data: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid weapon data: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeaponDef {
    pub id: String,
    pub name: String,
    pub ammo: AmmoSpec,
    pub ballistics: BallisticsConfig,
    /// Half-angle of the per-pellet spread cone.
    #[serde(default)]
    pub spread_angle_deg: f32,
    #[serde(default = "default_pellets")]
    pub pellets: u32,
    /// Minimum seconds between trigger pulls.
    #[serde(default = "default_fire_interval")]
    pub fire_interval: f32,
}

fn default_pellets() -> u32 {
    1
}

fn default_fire_interval() -> f32 {
    0.1
}

impl WeaponDef {
    pub fn spread_angle(&self) -> f32 {
        self.spread_angle_deg.to_radians()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeaponCatalog {
    pub version: u32,
    #[serde(default)]
    pub weapons: Vec<WeaponDef>,
}

#[derive(Clone, Debug, Default)]
pub struct CatalogValidation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl CatalogValidation {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

impl WeaponCatalog {
    pub fn builtin() -> Result<Self, WeaponDataError> {
        Self::parse_toml(BUILTIN_CATALOG)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, WeaponDataError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| WeaponDataError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::parse_toml(&text)?;
        debug!(path = %path.display(), weapons = catalog.weapons.len(), "weapon catalog loaded");
        Ok(catalog)
    }

    /// Parses and validates. Ammo specs without a `weapon` key inherit the weapon id.
    pub fn parse_toml(text: &str) -> Result<Self, WeaponDataError> {
        let mut catalog: WeaponCatalog = toml::from_str(text)?;
        for weapon in &mut catalog.weapons {
            if weapon.ammo.weapon.is_empty() {
                weapon.ammo.weapon = weapon.id.clone();
            }
        }
        let validation = catalog.validate();
        for warning in &validation.warnings {
            warn!("{}", warning);
        }
        if !validation.is_ok() {
            return Err(WeaponDataError::Invalid(validation.errors));
        }
        Ok(catalog)
    }

    pub fn get(&self, id: &str) -> Option<&WeaponDef> {
        self.weapons.iter().find(|weapon| weapon.id == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.weapons.iter().map(|weapon| weapon.id.as_str())
    }

    pub fn validate(&self) -> CatalogValidation {
        let mut validation = CatalogValidation::default();
        if self.version != CATALOG_VERSION {
            validation
                .errors
                .push(format!("unsupported version {}", self.version));
        }
        if self.weapons.is_empty() {
            validation
                .warnings
                .push("weapon catalog contains no weapons".to_string());
        }
        let mut seen = HashSet::new();
        for weapon in &self.weapons {
            if weapon.id.trim().is_empty() {
                validation
                    .errors
                    .push("weapon id must not be empty".to_string());
            } else if !seen.insert(weapon.id.as_str()) {
                validation
                    .errors
                    .push(format!("duplicate weapon id '{}'", weapon.id));
            }
            validate_weapon(weapon, &mut validation);
        }
        validation
    }
}

fn validate_weapon(weapon: &WeaponDef, validation: &mut CatalogValidation) {
    let id = &weapon.id;
    if weapon.name.trim().is_empty() {
        validation
            .warnings
            .push(format!("weapon '{}' has no display name", id));
    }
    if weapon.ammo.weapon != weapon.id {
        validation.errors.push(format!(
            "weapon '{}' ammo.weapon '{}' does not match its id",
            id, weapon.ammo.weapon
        ));
    }
    for error in weapon.ammo.validate() {
        validation
            .errors
            .push(format!("weapon '{}' ammo: {}", id, error));
    }
    for error in weapon.ballistics.validate() {
        validation
            .errors
            .push(format!("weapon '{}' ballistics: {}", id, error));
    }
    if weapon.pellets == 0 {
        validation
            .errors
            .push(format!("weapon '{}' pellets must be >= 1", id));
    }
    let spread = weapon.spread_angle_deg;
    if !spread.is_finite() || !(0.0..MAX_SPREAD_DEG).contains(&spread) {
        validation.errors.push(format!(
            "weapon '{}' spread_angle_deg must be in [0, {})",
            id, MAX_SPREAD_DEG
        ));
    }
    if !weapon.fire_interval.is_finite() || weapon.fire_interval < 0.0 {
        validation
            .errors
            .push(format!("weapon '{}' fire_interval must be >= 0", id));
    }
    if weapon.pellets > 1 && spread == 0.0 {
        validation.warnings.push(format!(
            "weapon '{}' fires {} pellets with no spread",
            id, weapon.pellets
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weapon_ammo::{AmmoAction, AmmoFeed};

    const PISTOL: &str = r#"
version = 1

[[weapons]]
id = "pistol"
name = "Pistol"

[weapons.ammo]
ammo_type = "9mm"
magazine_size = 12

[weapons.ballistics]
muzzle_velocity = 350.0
segment_length = 30.0
drag_per_segment = 15.0
gravity = 9.81
max_range = 200.0
"#;

    #[test]
    fn builtin_catalog_is_valid() {
        let catalog = WeaponCatalog::builtin().expect("builtin catalog");
        assert!(catalog.validate().is_ok());
        let ids: Vec<_> = catalog.ids().collect();
        assert_eq!(ids, vec!["rifle", "pump_shotgun", "pistol"]);

        let shotgun = catalog.get("pump_shotgun").expect("shotgun");
        assert_eq!(shotgun.ammo.weapon, "pump_shotgun");
        assert_eq!(shotgun.ammo.feed, AmmoFeed::Tube);
        assert_eq!(shotgun.ammo.action, AmmoAction::Pump);
        assert_eq!(shotgun.pellets, 8);
    }

    #[test]
    fn parse_applies_defaults() {
        let catalog = WeaponCatalog::parse_toml(PISTOL).expect("parse");
        let pistol = catalog.get("pistol").expect("pistol");
        assert_eq!(pistol.pellets, 1);
        assert_eq!(pistol.spread_angle_deg, 0.0);
        assert_eq!(pistol.ammo.weapon, "pistol");
        assert_eq!(pistol.ammo.feed, AmmoFeed::Magazine);
        assert_eq!(pistol.ballistics.destabilize_amount, 0.0);
        assert!(catalog.get("rifle").is_none());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let text = PISTOL.replace("name = \"Pistol\"", "name = \"Pistol\"\npellet = 2");
        let err = WeaponCatalog::parse_toml(&text).expect_err("unknown field");
        assert!(matches!(err, WeaponDataError::Parse(_)));
    }

    #[test]
    fn duplicate_ids_and_bad_ranges_are_invalid() {
        let mut catalog = WeaponCatalog::parse_toml(PISTOL).expect("parse");
        let mut copy = catalog.weapons[0].clone();
        copy.pellets = 0;
        copy.spread_angle_deg = 60.0;
        copy.ballistics.max_range = 1.0;
        catalog.weapons.push(copy);

        let validation = catalog.validate();
        assert!(!validation.is_ok());
        let has = |needle: &str| validation.errors.iter().any(|err| err.contains(needle));
        assert!(has("duplicate weapon id 'pistol'"));
        assert!(has("pellets"));
        assert!(has("spread_angle_deg"));
        assert!(has("max_range"));
    }

    #[test]
    fn invalid_catalog_reports_every_error() {
        let text = PISTOL
            .replace("version = 1", "version = 2")
            .replace("magazine_size = 12", "magazine_size = 0");
        match WeaponCatalog::parse_toml(&text) {
            Err(WeaponDataError::Invalid(errors)) => {
                assert!(errors.iter().any(|err| err.contains("unsupported version")));
                assert!(errors.iter().any(|err| err.contains("magazine_size")));
            }
            other => panic!("expected invalid catalog, got {:?}", other),
        }
    }

    #[test]
    fn pellets_without_spread_warn() {
        let mut catalog = WeaponCatalog::parse_toml(PISTOL).expect("parse");
        catalog.weapons[0].pellets = 6;
        let validation = catalog.validate();
        assert!(validation.is_ok());
        assert_eq!(validation.warnings.len(), 1);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = WeaponCatalog::load("/nonexistent/weapons.toml").expect_err("missing");
        assert!(matches!(err, WeaponDataError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/weapons.toml"));
    }
}
