use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Target the auto-plan falls back to when the stylist has not yet curated
/// one.
pub const DEFAULT_AUTO_TARGET: &str = "A beautiful, healthy, and professional hair color that enhances the client's features and corrects any issues found in the analysis.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreLighten {
    pub product: String,
    pub ratio: String,
    pub zone: String,
    pub time: String,
    pub visual_endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tone {
    pub shades: String,
    pub ratio: String,
    pub developer: String,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FashionOverlay {
    pub shades: String,
    pub saturation: String,
    pub time: String,
}

/// Structured formulation record. Generated against exactly one analysis and
/// one target descriptor; the orchestrator tracks that association, the plan
/// itself carries no back-reference. Replaced wholesale on regeneration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorPlan {
    pub path: String,
    pub pre_lighten: Option<PreLighten>,
    pub tone: Option<Tone>,
    pub fashion_overlay: Option<FashionOverlay>,
    pub steps: Vec<String>,
}

/// Closed catalog of professional lines offered in the target picker,
/// insertion-ordered for stable display.
pub fn brand_catalog() -> IndexMap<&'static str, Vec<&'static str>> {
    let mut catalog = IndexMap::new();
    catalog.insert(
        "Wella Koleston Perfect",
        vec!["6/0", "7/3", "8/81", "9/16", "10/69"],
    );
    catalog.insert("Redken Shades EQ", vec!["06GB", "07NB", "08T", "09V"]);
    catalog.insert("Goldwell Topchic", vec!["6N", "7KG", "8SB", "9A"]);
    catalog.insert(
        "Schwarzkopf Igora Royal",
        vec!["5-88", "7-57", "9-42", "9,5-1"],
    );
    catalog.insert("L'Oreal Majirel", vec!["5.3", "6.45", "7.1", "8.34"]);
    catalog
}

#[derive(Debug, Error, PartialEq)]
pub enum TargetColorError {
    #[error("unknown brand '{0}'")]
    UnknownBrand(String),
    #[error("brand '{brand}' has no shade '{shade}'")]
    UnknownShade { brand: String, shade: String },
    #[error("'{0}' is not a valid hex color (expected #RRGGBB)")]
    InvalidHex(String),
}

/// Target color descriptor: a (brand, shade) pair from the closed catalog or
/// a raw hex color. Passed by value into planning; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TargetColor {
    Catalog { brand: String, shade: String },
    Hex(String),
}

impl TargetColor {
    pub fn catalog(brand: &str, shade: &str) -> Result<Self, TargetColorError> {
        let catalog = brand_catalog();
        let Some(shades) = catalog.get(brand) else {
            return Err(TargetColorError::UnknownBrand(brand.to_string()));
        };
        if !shades.contains(&shade) {
            return Err(TargetColorError::UnknownShade {
                brand: brand.to_string(),
                shade: shade.to_string(),
            });
        }
        Ok(TargetColor::Catalog {
            brand: brand.to_string(),
            shade: shade.to_string(),
        })
    }

    pub fn hex(value: &str) -> Result<Self, TargetColorError> {
        let trimmed = value.trim();
        let valid = trimmed.len() == 7
            && trimmed.starts_with('#')
            && trimmed[1..].chars().all(|c| c.is_ascii_hexdigit());
        if !valid {
            return Err(TargetColorError::InvalidHex(trimmed.to_string()));
        }
        Ok(TargetColor::Hex(trimmed.to_ascii_uppercase()))
    }
}

impl fmt::Display for TargetColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetColor::Catalog { brand, shade } => write!(f, "{brand} {shade}"),
            TargetColor::Hex(value) => write!(f, "{value}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_target_requires_known_brand_and_shade() {
        let target = TargetColor::catalog("Redken Shades EQ", "09V").unwrap();
        assert_eq!(target.to_string(), "Redken Shades EQ 09V");

        assert_eq!(
            TargetColor::catalog("Acme Color Co", "1A"),
            Err(TargetColorError::UnknownBrand("Acme Color Co".to_string()))
        );
        assert_eq!(
            TargetColor::catalog("Goldwell Topchic", "99Z"),
            Err(TargetColorError::UnknownShade {
                brand: "Goldwell Topchic".to_string(),
                shade: "99Z".to_string(),
            })
        );
    }

    #[test]
    fn hex_target_is_normalized_and_validated() {
        assert_eq!(
            TargetColor::hex(" #b66fb3 ").unwrap(),
            TargetColor::Hex("#B66FB3".to_string())
        );
        assert!(TargetColor::hex("B66FB3").is_err());
        assert!(TargetColor::hex("#B66F").is_err());
        assert!(TargetColor::hex("#GGGGGG").is_err());
    }

    #[test]
    fn plan_serializes_optional_sections_in_wire_casing() -> anyhow::Result<()> {
        let plan = ColorPlan {
            path: "corrective".to_string(),
            pre_lighten: None,
            tone: Some(Tone {
                shades: "9V".to_string(),
                ratio: "1:1".to_string(),
                developer: "10vol".to_string(),
                time: "10min".to_string(),
            }),
            fashion_overlay: None,
            steps: vec!["Apply toner".to_string()],
        };
        let value = serde_json::to_value(&plan)?;
        assert!(value["preLighten"].is_null());
        assert_eq!(value["tone"]["developer"], "10vol");
        let parsed: ColorPlan = serde_json::from_value(value)?;
        assert_eq!(parsed, plan);
        Ok(())
    }
}
