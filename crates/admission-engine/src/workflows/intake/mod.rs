//! Transactional CSV import of a cycle's quota rows and evaluation criteria.
//!
//! Every row is parsed and validated before anything is returned, so a bad file never
//! leaves a half-applied configuration behind.

mod parser;

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use serde::Serialize;

use crate::workflows::admission::{
    CandidateId, Criterion, CriterionId, MunicipalityId, MunicipalityQuota, SubregionId,
};
use parser::{CriterionRow, QuotaRow, ScoreRow};

#[derive(Debug)]
pub enum ImportError {
    Io(std::io::Error),
    Csv(csv::Error),
    Invalid { line: usize, reason: String },
    Empty,
}

impl std::fmt::Display for ImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportError::Io(err) => write!(f, "failed to read configuration file: {}", err),
            ImportError::Csv(err) => write!(f, "invalid configuration CSV: {}", err),
            ImportError::Invalid { line, reason } => {
                write!(f, "invalid configuration row at line {}: {}", line, reason)
            }
            ImportError::Empty => write!(f, "configuration file contains no rows"),
        }
    }
}

impl std::error::Error for ImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ImportError::Io(err) => Some(err),
            ImportError::Csv(err) => Some(err),
            ImportError::Invalid { .. } | ImportError::Empty => None,
        }
    }
}

impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

/// Loads `municipality,subregion,capacity` rows.
pub struct QuotaImporter;

impl QuotaImporter {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Vec<MunicipalityQuota>, ImportError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Vec<MunicipalityQuota>, ImportError> {
        let rows = parser::parse_rows::<_, QuotaRow>(reader)?;
        if rows.is_empty() {
            return Err(ImportError::Empty);
        }

        let mut seen = HashSet::new();
        let mut quotas = Vec::with_capacity(rows.len());
        for (line, row) in rows {
            let municipality = required(line, "municipality", row.municipality)?;
            let subregion = required(line, "subregion", row.subregion)?;
            if !seen.insert(municipality.clone()) {
                return Err(ImportError::Invalid {
                    line,
                    reason: format!("duplicate municipality '{municipality}'"),
                });
            }

            quotas.push(MunicipalityQuota::new(
                MunicipalityId(municipality),
                SubregionId(subregion),
                row.capacity,
            ));
        }

        Ok(quotas)
    }
}

/// Loads `code,weight,max_points,order[,active]` rows.
pub struct CriteriaImporter;

impl CriteriaImporter {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Vec<Criterion>, ImportError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Vec<Criterion>, ImportError> {
        let rows = parser::parse_rows::<_, CriterionRow>(reader)?;
        if rows.is_empty() {
            return Err(ImportError::Empty);
        }

        let mut seen = HashSet::new();
        let mut criteria = Vec::with_capacity(rows.len());
        for (line, row) in rows {
            let code = required(line, "code", row.code)?;
            if !seen.insert(code.clone()) {
                return Err(ImportError::Invalid {
                    line,
                    reason: format!("duplicate criterion '{code}'"),
                });
            }
            if !row.max_points.is_finite() || row.max_points <= 0.0 {
                return Err(ImportError::Invalid {
                    line,
                    reason: format!("max_points must be positive for '{code}'"),
                });
            }
            if !row.weight.is_finite() || row.weight < 0.0 {
                return Err(ImportError::Invalid {
                    line,
                    reason: format!("weight must be non-negative for '{code}'"),
                });
            }

            criteria.push(Criterion {
                criterion_id: CriterionId(code),
                weight_percent: row.weight,
                max_points: row.max_points,
                order: row.order,
                active: row.active.unwrap_or(true),
            });
        }

        Ok(criteria)
    }
}

/// One evaluator score read from an evaluation sheet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreEntry {
    pub candidate_id: CandidateId,
    pub municipality_id: MunicipalityId,
    pub criterion_id: CriterionId,
    pub points: f64,
}

/// Loads `candidate_id,municipality_id,criterion,points` rows.
///
/// Range checks against the rubric happen when the entries are applied to the scoring
/// engine; this importer only rejects malformed rows and repeated candidate/criterion pairs.
pub struct ScoreImporter;

impl ScoreImporter {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Vec<ScoreEntry>, ImportError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Vec<ScoreEntry>, ImportError> {
        let rows = parser::parse_rows::<_, ScoreRow>(reader)?;
        if rows.is_empty() {
            return Err(ImportError::Empty);
        }

        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(rows.len());
        for (line, row) in rows {
            let candidate = required(line, "candidate_id", row.candidate_id)?;
            let municipality = required(line, "municipality_id", row.municipality_id)?;
            let criterion = required(line, "criterion", row.criterion)?;
            if !seen.insert((candidate.clone(), criterion.clone())) {
                return Err(ImportError::Invalid {
                    line,
                    reason: format!("duplicate score for '{candidate}' on '{criterion}'"),
                });
            }
            if !row.points.is_finite() {
                return Err(ImportError::Invalid {
                    line,
                    reason: format!("points for '{candidate}' must be a number"),
                });
            }

            entries.push(ScoreEntry {
                candidate_id: CandidateId(candidate),
                municipality_id: MunicipalityId(municipality),
                criterion_id: CriterionId(criterion),
                points: row.points,
            });
        }

        Ok(entries)
    }
}

fn required(line: usize, field: &str, value: String) -> Result<String, ImportError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ImportError::Invalid {
            line,
            reason: format!("{field} is required"),
        });
    }
    Ok(trimmed.to_string())
}
