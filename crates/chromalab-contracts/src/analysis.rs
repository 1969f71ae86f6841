use serde::{Deserialize, Serialize};

/// Hair porosity as reported by the diagnosis. The generator is asked for one
/// of the three canonical labels but is not trusted to comply; anything else
/// is kept verbatim as an unconstrained label rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Porosity {
    Low,
    Medium,
    High,
    Other(String),
}

impl Porosity {
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "Low" => Porosity::Low,
            "Medium" => Porosity::Medium,
            "High" => Porosity::High,
            other => Porosity::Other(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Porosity::Low => "Low",
            Porosity::Medium => "Medium",
            Porosity::High => "High",
            Porosity::Other(label) => label.as_str(),
        }
    }
}

impl From<String> for Porosity {
    fn from(label: String) -> Self {
        Porosity::from_label(&label)
    }
}

impl From<Porosity> for String {
    fn from(porosity: Porosity) -> Self {
        porosity.label().to_string()
    }
}

/// Structured diagnostic record for one client photo. Immutable once
/// produced; a new analysis always replaces the old one wholesale.
///
/// Field names serialize in the generator's wire casing so a validated
/// analysis re-serializes to the same shape it arrived in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HairAnalysis {
    pub natural_level: String,
    pub current_cosmetic_level: String,
    pub dominant_undertone: String,
    pub gray_percentage: String,
    pub porosity: Porosity,
    pub banding_zones: String,
    pub risk_flags: String,
    pub stylist_notes: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn porosity_keeps_unrecognized_labels() {
        assert_eq!(Porosity::from_label("High"), Porosity::High);
        assert_eq!(
            Porosity::from_label("Medium-High"),
            Porosity::Other("Medium-High".to_string())
        );
        assert_eq!(Porosity::from_label("Medium-High").label(), "Medium-High");
    }

    #[test]
    fn analysis_round_trips_in_wire_casing() -> anyhow::Result<()> {
        let analysis = HairAnalysis {
            natural_level: "Level 6".to_string(),
            current_cosmetic_level: "Level 7".to_string(),
            dominant_undertone: "Orange-Gold".to_string(),
            gray_percentage: "10%".to_string(),
            porosity: Porosity::High,
            banding_zones: "root band".to_string(),
            risk_flags: "none".to_string(),
            stylist_notes: "use bond builder".to_string(),
        };
        let value = serde_json::to_value(&analysis)?;
        assert_eq!(value["naturalLevel"], json!("Level 6"));
        assert_eq!(value["porosity"], json!("High"));
        assert_eq!(value["stylistNotes"], json!("use bond builder"));

        let parsed: HairAnalysis = serde_json::from_value(value)?;
        assert_eq!(parsed, analysis);
        Ok(())
    }
}
