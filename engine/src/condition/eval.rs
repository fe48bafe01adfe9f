use super::naming;
use super::{BarOffset, Comparand, Condition, Operator, Subject};
use crate::error::MissingValue;
use crate::market::indicators::IndicatorSpec;
use crate::market::snapshot::{EvaluationSnapshot, Frame};

const EQUALS_EPSILON: f64 = 1e-10;

/// Result of evaluating one condition. A condition whose operands cannot be
/// resolved is unsatisfied and carries the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub satisfied: bool,
    pub missing: Option<MissingValue>,
}

impl Evaluation {
    fn hit(satisfied: bool) -> Self {
        Self {
            satisfied,
            missing: None,
        }
    }

    fn missing(reason: MissingValue) -> Self {
        Self {
            satisfied: false,
            missing: Some(reason),
        }
    }
}

/// Evaluate a condition against the shared snapshot. Never fails.
pub fn evaluate(snapshot: &EvaluationSnapshot, condition: &Condition) -> Evaluation {
    match try_evaluate(snapshot, condition) {
        Ok(satisfied) => Evaluation::hit(satisfied),
        Err(reason) => Evaluation::missing(reason),
    }
}

fn try_evaluate(snapshot: &EvaluationSnapshot, condition: &Condition) -> Result<bool, MissingValue> {
    let tf = condition.timeframe.resolve(snapshot.base);
    let frame = snapshot.frame(&tf).ok_or(MissingValue::Frame(tf))?;

    let lhs = resolve_subject(frame, &condition.subject)?;

    // Candlestick patterns are boolean columns; no right-hand side.
    if condition.operator == Operator::Pattern {
        return Ok(lhs != 0.0);
    }

    if let Comparand::Range { low, high } = condition.compare {
        return Ok(match condition.operator {
            Operator::Between => lhs >= low && lhs <= high,
            _ => false,
        });
    }

    let rhs = resolve_comparand(frame, &condition.compare, condition.operator, condition.percentage)?;
    Ok(compare(lhs, condition.operator, rhs))
}

fn resolve_subject(frame: &Frame, subject: &Subject) -> Result<f64, MissingValue> {
    let last = frame.last().ok_or(MissingValue::NoBars)?;
    let value = match subject {
        Subject::Indicator { spec, component } => resolve_indicator(frame, spec, component)?,
        Subject::Price { field } => last.field(*field),
        Subject::Volume => last.volume,
    };
    finite(value, subject_label(subject))
}

fn resolve_comparand(
    frame: &Frame,
    compare: &Comparand,
    operator: Operator,
    percentage: Option<f64>,
) -> Result<f64, MissingValue> {
    match compare {
        Comparand::Literal(v) => Ok(*v),
        Comparand::Indicator { spec, component } => {
            let base = finite(resolve_indicator(frame, spec, component)?, &spec.name)?;
            Ok(apply_percentage(base, operator, percentage))
        }
        Comparand::PriceField { field, bar } => {
            let candle = match bar {
                BarOffset::Current => frame.last().ok_or(MissingValue::NoBars)?,
                BarOffset::Previous => frame.previous().ok_or(MissingValue::PreviousBar)?,
            };
            Ok(candle.field(*field))
        }
        // Rejected at registration for every operator except `pattern`.
        Comparand::None | Comparand::Range { .. } => Ok(f64::NAN),
    }
}

fn resolve_indicator(frame: &Frame, spec: &IndicatorSpec, component: &str) -> Result<f64, MissingValue> {
    let columns = frame
        .indicator(spec)
        .ok_or_else(|| MissingValue::Indicator(spec.to_string()))?;
    naming::resolve(columns, &spec.name, component).ok_or_else(|| MissingValue::Component {
        indicator: spec.name.clone(),
        component: component.to_string(),
    })
}

fn finite(value: f64, label: &str) -> Result<f64, MissingValue> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(MissingValue::Component {
            indicator: label.to_string(),
            component: "value".into(),
        })
    }
}

fn subject_label(subject: &Subject) -> &str {
    match subject {
        Subject::Indicator { spec, .. } => &spec.name,
        Subject::Price { .. } => "price",
        Subject::Volume => "volume",
    }
}

/// "Price N% above/below the moving average": above-type operators scale the
/// right-hand side up, below-type operators scale it down.
pub fn apply_percentage(rhs: f64, operator: Operator, percentage: Option<f64>) -> f64 {
    match percentage {
        Some(pct) if operator.is_above_type() => rhs * (1.0 + pct / 100.0),
        Some(pct) if operator.is_below_type() => rhs * (1.0 - pct / 100.0),
        _ => rhs,
    }
}

/// Numeric comparison. Crossing operators compare the current bar only.
pub fn compare(lhs: f64, operator: Operator, rhs: f64) -> bool {
    if rhs.is_nan() {
        return false;
    }
    match operator {
        Operator::Gt | Operator::CrossesAbove => lhs > rhs,
        Operator::Lt | Operator::CrossesBelow => lhs < rhs,
        Operator::Gte => lhs >= rhs,
        Operator::Lte => lhs <= rhs,
        Operator::Equals => (lhs - rhs).abs() < EQUALS_EPSILON,
        Operator::Between | Operator::Pattern => false,
    }
}
