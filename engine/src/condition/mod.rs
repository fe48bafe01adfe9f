pub mod eval;
pub mod naming;
pub mod normalize;
pub mod playbook;
pub mod registry;
pub mod state;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::market::indicators::IndicatorSpec;
use crate::market::models::{PriceField, Timeframe};

pub type AlertId = String;

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    Indicator,
    Price,
    Volume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Gt,
    Lt,
    Gte,
    Lte,
    Equals,
    CrossesAbove,
    CrossesBelow,
    Between,
    Pattern,
}

impl Operator {
    pub fn is_above_type(self) -> bool {
        matches!(self, Self::Gt | Self::Gte | Self::CrossesAbove)
    }

    pub fn is_below_type(self) -> bool {
        matches!(self, Self::Lt | Self::Lte | Self::CrossesBelow)
    }
}

/// Left-hand side of a condition, discriminated by `kind`.
#[derive(Debug, Clone, PartialEq)]
pub enum Subject {
    Indicator { spec: IndicatorSpec, component: String },
    Price { field: PriceField },
    Volume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarOffset {
    Current,
    Previous,
}

/// Right-hand side of a condition, discriminated by `compareMode`.
#[derive(Debug, Clone, PartialEq)]
pub enum Comparand {
    Literal(f64),
    Range { low: f64, high: f64 },
    Indicator { spec: IndicatorSpec, component: String },
    PriceField { field: PriceField, bar: BarOffset },
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeframeRef {
    Same,
    Specific(Timeframe),
}

impl TimeframeRef {
    pub fn resolve(&self, base: Timeframe) -> Timeframe {
        match self {
            Self::Same => base,
            Self::Specific(tf) => *tf,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub subject: Subject,
    pub operator: Operator,
    pub compare: Comparand,
    pub timeframe: TimeframeRef,
    /// Widens/narrows an indicator right-hand side (percent).
    pub percentage: Option<f64>,
}

impl Condition {
    pub fn kind(&self) -> ConditionKind {
        match self.subject {
            Subject::Indicator { .. } => ConditionKind::Indicator,
            Subject::Price { .. } => ConditionKind::Price,
            Subject::Volume => ConditionKind::Volume,
        }
    }

    pub fn indicators(&self) -> impl Iterator<Item = &IndicatorSpec> {
        let lhs = match &self.subject {
            Subject::Indicator { spec, .. } => Some(spec),
            _ => None,
        };
        let rhs = match &self.compare {
            Comparand::Indicator { spec, .. } => Some(spec),
            _ => None,
        };
        lhs.into_iter().chain(rhs)
    }
}

// ---------------------------------------------------------------------------
// Playbook
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Logic {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidityUnit {
    Bars,
    Minutes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybookEntry {
    pub id: String,
    pub priority: i32,
    pub enabled: bool,
    /// Applied against the running value of the entries before this one.
    pub connector: Logic,
    /// 0 disables latching.
    pub validity: u32,
    pub validity_unit: ValidityUnit,
    pub condition: Condition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GateLogic {
    All,
    Any,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Playbook {
    pub entries: Vec<PlaybookEntry>,
    pub gate: GateLogic,
}

// ---------------------------------------------------------------------------
// Alert
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FireMode {
    PerBar,
    PerClose,
    PerTick,
}

impl FireMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per_bar" | "once_per_bar" | "bar" => Some(Self::PerBar),
            "per_close" | "once_per_bar_close" | "on_close" | "close" => Some(Self::PerClose),
            "per_tick" | "every_tick" | "tick" => Some(Self::PerTick),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertAction {
    Webhook { url: String, secret: Option<String> },
    InApp,
    Bot { bot_id: String },
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlertLogic {
    Conditions { conditions: Vec<Condition>, logic: Logic },
    Playbook(Playbook),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub id: AlertId,
    pub owner_id: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub logic: AlertLogic,
    pub fire_mode: FireMode,
    pub action: AlertAction,
}

impl Alert {
    pub fn conditions(&self) -> Box<dyn Iterator<Item = &Condition> + '_> {
        match &self.logic {
            AlertLogic::Conditions { conditions, .. } => Box::new(conditions.iter()),
            AlertLogic::Playbook(pb) => Box::new(pb.entries.iter().map(|e| &e.condition)),
        }
    }

    /// Every (timeframe, indicator) pair this alert needs computed.
    pub fn required_indicators(&self) -> HashSet<(Timeframe, IndicatorSpec)> {
        self.conditions()
            .flat_map(|c| {
                let tf = c.timeframe.resolve(self.timeframe);
                c.indicators().map(move |spec| (tf, spec.clone()))
            })
            .collect()
    }

    /// Every timeframe this alert's conditions read, base included.
    pub fn required_timeframes(&self) -> HashSet<Timeframe> {
        let mut tfs: HashSet<Timeframe> = self
            .conditions()
            .map(|c| c.timeframe.resolve(self.timeframe))
            .collect();
        tfs.insert(self.timeframe);
        tfs
    }
}
