use serde::{Deserialize, Deserializer};
use std::io::Read;

/// Raw quota row as exported by the program's configuration sheet.
#[derive(Debug, Deserialize)]
pub(crate) struct QuotaRow {
    #[serde(alias = "municipio", alias = "municipality_id")]
    pub(crate) municipality: String,
    #[serde(alias = "subregion_id")]
    pub(crate) subregion: String,
    #[serde(alias = "cupo", alias = "capacity_max")]
    pub(crate) capacity: u32,
}

/// Raw criterion row.
#[derive(Debug, Deserialize)]
pub(crate) struct CriterionRow {
    #[serde(alias = "codigo", alias = "criterion_id")]
    pub(crate) code: String,
    #[serde(alias = "peso", alias = "weight_percent")]
    pub(crate) weight: f64,
    #[serde(alias = "puntaje_maximo")]
    pub(crate) max_points: f64,
    #[serde(alias = "orden")]
    pub(crate) order: u32,
    #[serde(default, deserialize_with = "optional_flag")]
    pub(crate) active: Option<bool>,
}

/// Raw evaluation row: one criterion score for one candidate.
#[derive(Debug, Deserialize)]
pub(crate) struct ScoreRow {
    #[serde(alias = "candidato", alias = "candidate")]
    pub(crate) candidate_id: String,
    #[serde(alias = "municipio", alias = "municipality")]
    pub(crate) municipality_id: String,
    #[serde(alias = "criterio", alias = "criterion_id", alias = "code")]
    pub(crate) criterion: String,
    #[serde(alias = "puntaje", alias = "score")]
    pub(crate) points: f64,
}

/// Rows paired with their 1-based data line (header is line 1).
pub(crate) fn parse_rows<R, T>(reader: R) -> Result<Vec<(usize, T)>, csv::Error>
where
    R: Read,
    T: for<'de> Deserialize<'de>,
{
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut rows = Vec::new();

    for (index, record) in csv_reader.deserialize::<T>().enumerate() {
        rows.push((index + 2, record?));
    }

    Ok(rows)
}

fn optional_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "true" | "yes" | "si" | "1" | "activo" => Ok(Some(true)),
            "false" | "no" | "0" | "inactivo" => Ok(Some(false)),
            other => Err(serde::de::Error::custom(format!(
                "unrecognized active flag '{other}'"
            ))),
        },
    }
}
