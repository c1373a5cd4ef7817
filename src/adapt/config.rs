use crate::domain::mesh::MAX_POLYNOMIAL_ORDER;

use json::JsonValue;
use std::fmt;
use std::fs::read_to_string;
use std::str::FromStr;
use thiserror::Error;

/// Families of refinement candidates considered by the selector
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CandList {
    /// p-candidates, isotropic orders
    PIso,
    /// p-candidates, anisotropic orders
    PAniso,
    /// h-candidates, isotropic split
    HIso,
    /// h-candidates, isotropic and anisotropic splits
    HAniso,
    /// hp-candidates, isotropic splits and orders
    HpIso,
    /// hp-candidates, anisotropic splits, isotropic orders
    HpAnisoH,
    /// hp-candidates, isotropic splits, anisotropic orders
    HpAnisoP,
    /// hp-candidates, anisotropic splits and orders
    HpAniso,
}

impl CandList {
    pub const ALL: [CandList; 8] = [
        Self::PIso,
        Self::PAniso,
        Self::HIso,
        Self::HAniso,
        Self::HpIso,
        Self::HpAnisoH,
        Self::HpAnisoP,
        Self::HpAniso,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::PIso => "P_ISO",
            Self::PAniso => "P_ANISO",
            Self::HIso => "H_ISO",
            Self::HAniso => "H_ANISO",
            Self::HpIso => "HP_ISO",
            Self::HpAnisoH => "HP_ANISO_H",
            Self::HpAnisoP => "HP_ANISO_P",
            Self::HpAniso => "HP_ANISO",
        }
    }
}

impl fmt::Display for CandList {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CandList {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|cand_list| cand_list.name().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| ConfigError::InvalidValue("CAND_LIST", s.to_string()))
    }
}

/// Norm used to measure errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NormKind {
    L2,
    H1Seminorm,
    H1,
}

/// How the errors of multiple solution components are combined per element
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComponentCombination {
    RootSumOfSquares,
    Sum,
}

/// Whether the total error is reported as an absolute value or relative to the reference solution's norm
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorMode {
    Absolute,
    /// percentage of the reference solution's global norm
    RelativeErrorToGlobalNorm,
}

/// Strategy used to pick which elements get refined
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkingStrategy {
    /// largest errors first until their sum reaches `threshold` of the total
    Cumulative,
    /// every element with an error of at least `threshold` times the largest error
    RelativeToMax,
    /// every element with an error above `threshold` (an absolute error, not a fraction)
    Absolute,
}

/// How the mesh is coarsened by a periodic global derefinement
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnrefMethod {
    /// back to the initial mesh; every order becomes `P_INIT`
    ResetToBase = 1,
    /// one layer of h-refinement is removed; every order becomes `P_INIT`
    ShaveLayer = 2,
    /// one layer of h-refinement is removed; every order is lowered by one (not below `P_INIT`)
    ShaveLayerLowerOrders = 3,
}

impl UnrefMethod {
    pub fn from_code(code: usize) -> Option<Self> {
        match code {
            1 => Some(Self::ResetToBase),
            2 => Some(Self::ShaveLayer),
            3 => Some(Self::ShaveLayerLowerOrders),
            _ => None,
        }
    }
}

/// How the error of a refinement candidate is predicted without solving again
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CandidateErrorModel {
    /// `e_c = e_0 * (d_c / d_0)^(-conv_exp)`
    Analytic,
    /// local projection of the reference solution onto the candidate's polynomials
    Projection,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unable to parse configuration as JSON: {0}")]
    Json(#[from] json::Error),
    #[error("Configuration must be a JSON object!")]
    NotAnObject,
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

/// Every tunable of the adaptivity loop
///
/// Keys in JSON configuration files use the conventional names (`THRESHOLD`, `CAND_LIST`, ...).
#[derive(Clone, Debug, PartialEq)]
pub struct AdaptivityConfig {
    /// `THRESHOLD`: marking fraction in `(0, 1]` (a positive error bound with absolute marking)
    pub threshold: f64,
    /// `CAND_LIST`
    pub cand_list: CandList,
    /// `CONV_EXP`: exponent applied to the DOF increase when scoring candidates
    pub conv_exp: f64,
    /// `ERR_STOP`: the loop stops once the error estimate drops below this value (percent in relative mode)
    pub err_stop: f64,
    /// `NDOF_STOP`: the loop stops once the coarse Space has at least this many DOFs
    pub ndof_stop: usize,
    /// `MESH_REGULARITY`: maximum hanging node level; negative for unlimited
    pub mesh_regularity: i32,
    /// `MARKING`
    pub marking: MarkingStrategy,
    /// `MAX_ADAPT_NUM`: iteration ceiling
    pub max_iterations: usize,
    /// `MAX_P`
    pub max_order: u8,
    /// `NORM`
    pub norm: NormKind,
    /// `ERROR_MODE`
    pub error_mode: ErrorMode,
    /// `COMBINE`
    pub combination: ComponentCombination,
    /// `CAND_ERROR`
    pub candidate_error: CandidateErrorModel,
    /// `REF_SPLIT`: split every element when building the reference Space
    pub reference_split: bool,
    /// `REF_ORDER_INCREASE`: order increase applied when building the reference Space
    pub reference_order_increase: u8,
    /// `TIE_TOLERANCE`: relative tolerance under which errors and scores are considered equal
    pub tie_tolerance: f64,
    /// `QUAD_EXTRA`: Gauss points added on top of `max order + 2` per direction
    pub quad_extra: usize,
    /// `GRAPH_DOF`: path of the DOF/error convergence graph
    pub graph_dof_path: Option<String>,
    /// `GRAPH_CPU`: path of the CPU time/error convergence graph
    pub graph_cpu_path: Option<String>,
    /// `UNREF_FREQ`: the Space is derefined every this many steps of a time dependent problem (0 never)
    pub unref_freq: usize,
    /// `UNREF_METHOD`: 1, 2 or 3
    pub unref_method: UnrefMethod,
    /// `P_INIT`: orders the derefinement resets to (or lowers towards)
    pub init_order: u8,
}

impl Default for AdaptivityConfig {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            cand_list: CandList::HpAniso,
            conv_exp: 1.0,
            err_stop: 1.0,
            ndof_stop: 60000,
            mesh_regularity: -1,
            marking: MarkingStrategy::Cumulative,
            max_iterations: 100,
            max_order: 10,
            norm: NormKind::H1,
            error_mode: ErrorMode::RelativeErrorToGlobalNorm,
            combination: ComponentCombination::RootSumOfSquares,
            candidate_error: CandidateErrorModel::Analytic,
            reference_split: true,
            reference_order_increase: 1,
            tie_tolerance: 1e-10,
            quad_extra: 3,
            graph_dof_path: None,
            graph_cpu_path: None,
            unref_freq: 0,
            unref_method: UnrefMethod::ShaveLayerLowerOrders,
            init_order: 1,
        }
    }
}

impl AdaptivityConfig {
    /// Load a configuration from a JSON file; missing keys keep their default values
    ///
    /// config.json
    /// ```JSON
    /// {
    ///     "THRESHOLD": 0.3,
    ///     "CAND_LIST": "HP_ANISO",
    ///     "CONV_EXP": 1.0,
    ///     "ERR_STOP": 1.0,
    ///     "NDOF_STOP": 60000,
    ///     "MESH_REGULARITY": -1
    /// }
    /// ```
    pub fn from_file(path: impl AsRef<str>) -> Result<Self, ConfigError> {
        let contents = read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    /// Parse a configuration from a JSON string (see [AdaptivityConfig::from_file])
    ///
    /// ```
    /// use hp_adapt::adapt::config::{AdaptivityConfig, CandList};
    ///
    /// let config = AdaptivityConfig::from_json_str(r#"{ "CAND_LIST": "H_ISO", "ERR_STOP": 0.5 }"#).unwrap();
    /// assert_eq!(config.cand_list, CandList::HIso);
    /// assert_eq!(config.err_stop, 0.5);
    /// assert_eq!(config.threshold, 0.3);
    /// ```
    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        let config_json = json::parse(contents)?;
        if !config_json.is_object() {
            return Err(ConfigError::NotAnObject);
        }

        let mut config = Self::default();
        for (key, value) in config_json.entries() {
            match key {
                "THRESHOLD" => config.threshold = as_f64("THRESHOLD", value)?,
                "CAND_LIST" => config.cand_list = as_str("CAND_LIST", value)?.parse()?,
                "CONV_EXP" => config.conv_exp = as_f64("CONV_EXP", value)?,
                "ERR_STOP" => config.err_stop = as_f64("ERR_STOP", value)?,
                "NDOF_STOP" => config.ndof_stop = as_usize("NDOF_STOP", value)?,
                "MESH_REGULARITY" => {
                    config.mesh_regularity = value
                        .as_i32()
                        .ok_or_else(|| invalid("MESH_REGULARITY", value))?
                }
                "MARKING" => {
                    config.marking = match as_str("MARKING", value)? {
                        "cumulative" => MarkingStrategy::Cumulative,
                        "relative_to_max" => MarkingStrategy::RelativeToMax,
                        "absolute" => MarkingStrategy::Absolute,
                        _ => return Err(invalid("MARKING", value)),
                    }
                }
                "MAX_ADAPT_NUM" => config.max_iterations = as_usize("MAX_ADAPT_NUM", value)?,
                "MAX_P" => {
                    config.max_order = value.as_u8().ok_or_else(|| invalid("MAX_P", value))?
                }
                "NORM" => {
                    config.norm = match as_str("NORM", value)? {
                        "L2" => NormKind::L2,
                        "H1_SEMI" => NormKind::H1Seminorm,
                        "H1" => NormKind::H1,
                        _ => return Err(invalid("NORM", value)),
                    }
                }
                "ERROR_MODE" => {
                    config.error_mode = match as_str("ERROR_MODE", value)? {
                        "absolute" => ErrorMode::Absolute,
                        "relative" => ErrorMode::RelativeErrorToGlobalNorm,
                        _ => return Err(invalid("ERROR_MODE", value)),
                    }
                }
                "COMBINE" => {
                    config.combination = match as_str("COMBINE", value)? {
                        "rss" => ComponentCombination::RootSumOfSquares,
                        "sum" => ComponentCombination::Sum,
                        _ => return Err(invalid("COMBINE", value)),
                    }
                }
                "CAND_ERROR" => {
                    config.candidate_error = match as_str("CAND_ERROR", value)? {
                        "analytic" => CandidateErrorModel::Analytic,
                        "projection" => CandidateErrorModel::Projection,
                        _ => return Err(invalid("CAND_ERROR", value)),
                    }
                }
                "REF_SPLIT" => {
                    config.reference_split =
                        value.as_bool().ok_or_else(|| invalid("REF_SPLIT", value))?
                }
                "REF_ORDER_INCREASE" => {
                    config.reference_order_increase = value
                        .as_u8()
                        .ok_or_else(|| invalid("REF_ORDER_INCREASE", value))?
                }
                "TIE_TOLERANCE" => config.tie_tolerance = as_f64("TIE_TOLERANCE", value)?,
                "QUAD_EXTRA" => config.quad_extra = as_usize("QUAD_EXTRA", value)?,
                "GRAPH_DOF" => config.graph_dof_path = Some(as_str("GRAPH_DOF", value)?.to_string()),
                "GRAPH_CPU" => config.graph_cpu_path = Some(as_str("GRAPH_CPU", value)?.to_string()),
                "UNREF_FREQ" => config.unref_freq = as_usize("UNREF_FREQ", value)?,
                "UNREF_METHOD" => {
                    config.unref_method = value
                        .as_usize()
                        .and_then(UnrefMethod::from_code)
                        .ok_or_else(|| invalid("UNREF_METHOD", value))?
                }
                "P_INIT" => {
                    config.init_order = value.as_u8().ok_or_else(|| invalid("P_INIT", value))?
                }
                _ => return Err(ConfigError::UnknownKey(key.to_string())),
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that every tunable is within its admissible range
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold_ok = match self.marking {
            MarkingStrategy::Absolute => self.threshold.is_finite() && self.threshold > 0.0,
            _ => self.threshold > 0.0 && self.threshold <= 1.0,
        };
        if !threshold_ok {
            return Err(ConfigError::InvalidValue("THRESHOLD", self.threshold.to_string()));
        }
        if !(self.conv_exp.is_finite() && self.conv_exp >= 0.0) {
            return Err(ConfigError::InvalidValue("CONV_EXP", self.conv_exp.to_string()));
        }
        if !(self.err_stop >= 0.0) {
            return Err(ConfigError::InvalidValue("ERR_STOP", self.err_stop.to_string()));
        }
        if self.mesh_regularity < -1 {
            return Err(ConfigError::InvalidValue(
                "MESH_REGULARITY",
                self.mesh_regularity.to_string(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::InvalidValue("MAX_ADAPT_NUM", String::from("0")));
        }
        if self.max_order == 0 || self.max_order > MAX_POLYNOMIAL_ORDER {
            return Err(ConfigError::InvalidValue("MAX_P", self.max_order.to_string()));
        }
        if !(self.tie_tolerance.is_finite() && self.tie_tolerance >= 0.0) {
            return Err(ConfigError::InvalidValue(
                "TIE_TOLERANCE",
                self.tie_tolerance.to_string(),
            ));
        }
        if self.init_order == 0 || self.init_order > self.max_order {
            return Err(ConfigError::InvalidValue("P_INIT", self.init_order.to_string()));
        }
        if !self.reference_split && self.reference_order_increase == 0 {
            return Err(ConfigError::InvalidValue(
                "REF_ORDER_INCREASE",
                String::from("0 (the reference Space must differ from the coarse Space)"),
            ));
        }

        Ok(())
    }

    /// Whether the total error is reported relative to the reference solution
    pub fn normalize_by_reference(&self) -> bool {
        self.error_mode == ErrorMode::RelativeErrorToGlobalNorm
    }
}

fn invalid(key: &'static str, value: &JsonValue) -> ConfigError {
    ConfigError::InvalidValue(key, value.dump())
}

fn as_f64(key: &'static str, value: &JsonValue) -> Result<f64, ConfigError> {
    value.as_f64().ok_or_else(|| invalid(key, value))
}

fn as_usize(key: &'static str, value: &JsonValue) -> Result<usize, ConfigError> {
    value.as_usize().ok_or_else(|| invalid(key, value))
}

fn as_str<'a>(key: &'static str, value: &'a JsonValue) -> Result<&'a str, ConfigError> {
    value.as_str().ok_or_else(|| invalid(key, value))
}
