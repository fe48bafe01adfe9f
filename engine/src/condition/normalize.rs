//! One-time mapping of loosely-shaped alert definitions onto the closed
//! condition types. Aliased field names and operator spellings are resolved
//! here, at registration, so the evaluator only ever matches on enums.

use serde_json::{Map, Value};

use super::{
    Alert, AlertAction, AlertLogic, BarOffset, Comparand, Condition, FireMode, GateLogic, Logic,
    Operator, Playbook, PlaybookEntry, Subject, TimeframeRef, ValidityUnit,
};
use crate::error::ConfigurationError;
use crate::market::indicators::IndicatorSpec;
use crate::market::models::{PriceField, Timeframe};

type Obj = Map<String, Value>;

/// Parameter keys accepted at the top level of a condition as well as under `params`.
const INLINE_PARAMS: &[&str] = &["period", "fast", "slow", "signal", "std_dev", "stddev", "length"];

pub fn normalize_alert(raw: &Value, default_fire_mode: FireMode) -> Result<Alert, ConfigurationError> {
    let obj = raw.as_object().ok_or(ConfigurationError::NotAnObject)?;

    let id = id_string(field(obj, &["id", "alert_id", "alertId"])).ok_or(ConfigurationError::MissingField("id"))?;
    let owner_id = id_string(field(obj, &["owner_id", "ownerId", "user_id", "userId"])).unwrap_or_default();
    let symbol = string(obj, &["symbol", "ticker"])
        .map(|s| s.trim().to_ascii_uppercase())
        .filter(|s| !s.is_empty())
        .ok_or(ConfigurationError::MissingField("symbol"))?;
    let tf_raw = string(obj, &["timeframe", "base_timeframe", "baseTimeframe", "interval"])
        .ok_or(ConfigurationError::MissingField("timeframe"))?;
    let timeframe = Timeframe::parse(tf_raw).ok_or_else(|| ConfigurationError::UnknownTimeframe(tf_raw.to_string()))?;

    let logic = alert_logic(obj)?;

    let fire_mode = match string(obj, &["fire_mode", "fireMode", "trigger_frequency", "triggerFrequency"]) {
        Some(s) => FireMode::parse(s).ok_or_else(|| invalid("fire_mode", s))?,
        None => default_fire_mode,
    };

    let action = alert_action(obj)?;

    Ok(Alert {
        id,
        owner_id,
        symbol,
        timeframe,
        logic,
        fire_mode,
        action,
    })
}

fn alert_logic(obj: &Obj) -> Result<AlertLogic, ConfigurationError> {
    if let Some(pb) = field(obj, &["playbook"]) {
        return playbook(pb, obj).map(AlertLogic::Playbook);
    }

    let list = field(obj, &["conditions"])
        .and_then(Value::as_array)
        .filter(|l| !l.is_empty())
        .ok_or(ConfigurationError::EmptyLogic)?;
    let conditions = list
        .iter()
        .enumerate()
        .map(|(index, c)| {
            normalize_condition(c).map_err(|e| ConfigurationError::Condition {
                index,
                reason: e.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let logic = match string(obj, &["logic", "group_logic", "groupLogic", "condition_logic"]) {
        Some(s) => parse_logic(s).ok_or_else(|| invalid("logic", s))?,
        None => Logic::And,
    };
    Ok(AlertLogic::Conditions { conditions, logic })
}

/// Accepts `{"entries": [...], "gate": "ANY"}` or a bare entry array with the
/// gate on the enclosing alert.
fn playbook(raw: &Value, alert: &Obj) -> Result<Playbook, ConfigurationError> {
    let (list, gate_src) = match raw {
        Value::Array(list) => (list, alert),
        Value::Object(o) => (
            field(o, &["entries", "conditions"])
                .and_then(Value::as_array)
                .ok_or(ConfigurationError::EmptyLogic)?,
            o,
        ),
        _ => return Err(invalid("playbook", "expected an object or array")),
    };
    if list.is_empty() {
        return Err(ConfigurationError::EmptyLogic);
    }

    let gate_raw = string(gate_src, &["gate", "gate_logic", "gateLogic"])
        .or_else(|| string(alert, &["gate_logic", "gateLogic"]));
    let gate = match gate_raw {
        Some(s) => match s.trim().to_ascii_uppercase().as_str() {
            "ALL" | "AND" => GateLogic::All,
            "ANY" | "OR" => GateLogic::Any,
            _ => return Err(invalid("gate_logic", s)),
        },
        None => GateLogic::All,
    };

    let mut entries: Vec<PlaybookEntry> = Vec::with_capacity(list.len());
    for (index, raw) in list.iter().enumerate() {
        let entry = playbook_entry(raw, index).map_err(|e| match e {
            ConfigurationError::Condition { .. } => e,
            other => ConfigurationError::Condition {
                index,
                reason: other.to_string(),
            },
        })?;
        if entries.iter().any(|e| e.id == entry.id) {
            return Err(ConfigurationError::DuplicateEntry(entry.id));
        }
        entries.push(entry);
    }
    Ok(Playbook { entries, gate })
}

fn playbook_entry(raw: &Value, index: usize) -> Result<PlaybookEntry, ConfigurationError> {
    let obj = raw.as_object().ok_or(ConfigurationError::NotAnObject)?;

    let id = id_string(field(obj, &["id", "entry_id", "entryId"])).unwrap_or_else(|| index.to_string());
    let priority = match field(obj, &["priority", "order"]) {
        Some(v) => v
            .as_i64()
            .and_then(|p| i32::try_from(p).ok())
            .ok_or_else(|| invalid("priority", v))?,
        None => index as i32,
    };
    let enabled = match field(obj, &["enabled", "is_enabled", "active"]) {
        Some(v) => v.as_bool().ok_or_else(|| invalid("enabled", v))?,
        None => true,
    };
    let connector = match string(obj, &["connector", "connector_logic", "connectorLogic", "logic"]) {
        Some(s) => parse_logic(s).ok_or_else(|| invalid("connector_logic", s))?,
        None => Logic::And,
    };
    let validity = match field(obj, &["validity_duration", "validityDuration", "validity"]) {
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| invalid("validity_duration", v))?,
        None => 0,
    };
    let validity_unit = match string(obj, &["validity_unit", "validityUnit"]) {
        Some(s) => match s.trim().to_ascii_lowercase().as_str() {
            "bars" | "bar" | "candles" | "candle" => ValidityUnit::Bars,
            "minutes" | "minute" | "mins" | "min" | "m" => ValidityUnit::Minutes,
            _ => return Err(invalid("validity_unit", s)),
        },
        None => ValidityUnit::Bars,
    };

    // Condition either nested or inline with the entry fields.
    let condition = match field(obj, &["condition"]) {
        Some(c) => normalize_condition(c)?,
        None => normalize_condition(raw)?,
    };

    Ok(PlaybookEntry {
        id,
        priority,
        enabled,
        connector,
        validity,
        validity_unit,
        condition,
    })
}

pub fn normalize_condition(raw: &Value) -> Result<Condition, ConfigurationError> {
    let obj = raw.as_object().ok_or(ConfigurationError::NotAnObject)?;

    let op_raw = string(obj, &["operator", "op", "comparison"]).ok_or(ConfigurationError::MissingField("operator"))?;
    let operator = parse_operator(op_raw).ok_or_else(|| ConfigurationError::UnknownOperator(op_raw.to_string()))?;

    let kind = match string(obj, &["kind", "type", "condition_type"]) {
        Some(k) => k.trim().to_ascii_lowercase(),
        None if field(obj, &["indicator", "indicator_name", "indicatorName"]).is_some() => "indicator".into(),
        None => "price".into(),
    };
    let subject = match kind.as_str() {
        "indicator" | "pattern" | "candlestick" => {
            let spec = indicator_spec(obj)?;
            let component = string(obj, &["component", "output", "indicator_component"])
                .map(str::to_string)
                .unwrap_or_else(|| spec.name.clone());
            Subject::Indicator { spec, component }
        }
        "price" => {
            let field = match string(obj, &["field", "price_field", "priceField", "source"]) {
                Some(f) => PriceField::parse(f).ok_or_else(|| invalid("price_field", f))?,
                None => PriceField::Close,
            };
            Subject::Price { field }
        }
        "volume" => Subject::Volume,
        other => return Err(invalid("kind", other)),
    };

    if operator == Operator::Pattern && !matches!(subject, Subject::Indicator { .. }) {
        return Err(invalid("operator", "pattern requires an indicator condition"));
    }

    let compare = comparand(obj, operator)?;

    let timeframe = match string(obj, &["timeframe", "tf"]) {
        None => TimeframeRef::Same,
        Some(s) if s.trim().eq_ignore_ascii_case("same") || s.trim().is_empty() => TimeframeRef::Same,
        Some(s) => TimeframeRef::Specific(Timeframe::parse(s).ok_or_else(|| ConfigurationError::UnknownTimeframe(s.to_string()))?),
    };

    let percentage = match field(obj, &["percentage", "percent", "pct", "offset_percent"]) {
        Some(v) => Some(number(v).ok_or_else(|| invalid("percentage", v))?),
        None => None,
    };

    Ok(Condition {
        subject,
        operator,
        compare,
        timeframe,
        percentage,
    })
}

fn comparand(obj: &Obj, operator: Operator) -> Result<Comparand, ConfigurationError> {
    let mode = match string(obj, &["compare_mode", "compareMode", "compare_to", "compareTo"]) {
        Some(m) => m.trim().to_ascii_lowercase().replace(['-', ' '], "_"),
        None if operator == Operator::Pattern => "none".into(),
        None if field(obj, &["compare_indicator", "compareIndicator"]).is_some() => "other_indicator".into(),
        None if field(obj, &["compare_field", "compareField"]).is_some() => "price_field".into(),
        None => "literal".into(),
    };

    let compare = match mode.as_str() {
        "literal" | "value" | "number" => {
            if operator == Operator::Between {
                range(obj)?
            } else {
                let v = field(obj, &["value", "compare_value", "compareValue", "threshold"])
                    .ok_or(ConfigurationError::MissingField("value"))?;
                Comparand::Literal(number(v).ok_or_else(|| invalid("value", v))?)
            }
        }
        "other_indicator" | "otherindicator" | "indicator" => {
            let nested = field(obj, &["compare_indicator", "compareIndicator"])
                .ok_or(ConfigurationError::MissingField("compare_indicator"))?;
            let spec_obj = match nested {
                Value::Object(o) => o.clone(),
                Value::String(name) => {
                    let mut o = Obj::new();
                    o.insert("indicator".into(), Value::String(name.clone()));
                    if let Some(p) = field(obj, &["compare_params", "compareParams"]) {
                        o.insert("params".into(), p.clone());
                    }
                    o
                }
                other => return Err(invalid("compare_indicator", other)),
            };
            let spec = indicator_spec(&spec_obj)?;
            let component = string(&spec_obj, &["component", "output"])
                .or_else(|| string(obj, &["compare_component", "compareComponent"]))
                .map(str::to_string)
                .unwrap_or_else(|| spec.name.clone());
            Comparand::Indicator { spec, component }
        }
        "price_field" | "pricefield" | "field" | "previous_bar_field" | "previousbarfield" | "previous_bar" => {
            let f = string(obj, &["compare_field", "compareField", "value"]).unwrap_or("close");
            let field = PriceField::parse(f).ok_or_else(|| invalid("compare_field", f))?;
            let bar = if mode.starts_with("previous") {
                BarOffset::Previous
            } else {
                BarOffset::Current
            };
            Comparand::PriceField { field, bar }
        }
        "none" => Comparand::None,
        other => return Err(invalid("compare_mode", other)),
    };

    match (&compare, operator) {
        (Comparand::None, Operator::Pattern) => Ok(compare),
        (Comparand::None, _) => Err(invalid("compare_mode", "none is only valid for pattern conditions")),
        (_, Operator::Pattern) => Ok(Comparand::None),
        (Comparand::Range { .. }, Operator::Between) => Ok(compare),
        (_, Operator::Between) => Err(invalid("operator", "between needs a literal range")),
        _ => Ok(compare),
    }
}

fn range(obj: &Obj) -> Result<Comparand, ConfigurationError> {
    let (low, high) = match field(obj, &["value", "compare_value", "compareValue", "range"]) {
        Some(Value::Array(pair)) if pair.len() == 2 => (
            number(&pair[0]).ok_or_else(|| invalid("value", &pair[0]))?,
            number(&pair[1]).ok_or_else(|| invalid("value", &pair[1]))?,
        ),
        Some(Value::Object(o)) => bounds(o)?,
        Some(other) => return Err(invalid("value", other)),
        None => bounds(obj)?,
    };
    if low > high {
        return Err(invalid("value", format!("range {low}..{high} is empty")));
    }
    Ok(Comparand::Range { low, high })
}

fn bounds(obj: &Obj) -> Result<(f64, f64), ConfigurationError> {
    let low = field(obj, &["low", "min", "lower", "value_min"]).ok_or(ConfigurationError::MissingField("low"))?;
    let high = field(obj, &["high", "max", "upper", "value_max"]).ok_or(ConfigurationError::MissingField("high"))?;
    Ok((
        number(low).ok_or_else(|| invalid("low", low))?,
        number(high).ok_or_else(|| invalid("high", high))?,
    ))
}

fn indicator_spec(obj: &Obj) -> Result<IndicatorSpec, ConfigurationError> {
    let name = string(obj, &["indicator", "indicator_name", "indicatorName", "name", "pattern"])
        .filter(|s| !s.trim().is_empty())
        .ok_or(ConfigurationError::MissingField("indicator"))?;
    let mut spec = IndicatorSpec::new(name.trim());

    if let Some(params) = field(obj, &["params", "parameters", "indicator_params"]) {
        let params = params.as_object().ok_or_else(|| invalid("params", params))?;
        for (k, v) in params {
            if v.is_null() {
                continue;
            }
            let n = number(v).ok_or_else(|| invalid("params", format!("{k}={v}")))?;
            spec = spec.with_param(k, n);
        }
    }
    for key in INLINE_PARAMS {
        if let Some(v) = obj.get(*key).filter(|v| !v.is_null()) {
            let n = number(v).ok_or_else(|| invalid("params", format!("{key}={v}")))?;
            spec = spec.with_param(key, n);
        }
    }
    Ok(spec)
}

fn alert_action(obj: &Obj) -> Result<AlertAction, ConfigurationError> {
    let raw = match field(obj, &["action", "action_type", "actionType"]) {
        Some(v) => v,
        None => {
            return Ok(match string(obj, &["webhook_url", "webhookUrl"]) {
                Some(url) => webhook(url, string(obj, &["webhook_secret", "webhookSecret"]))?,
                None => AlertAction::None,
            });
        }
    };

    let (kind, cfg) = match raw {
        Value::String(s) => (s.as_str(), obj),
        Value::Object(o) => (string(o, &["type", "kind"]).unwrap_or("none"), o),
        other => return Err(invalid("action", other)),
    };

    match kind.trim().to_ascii_lowercase().as_str() {
        "webhook" => {
            let url = string(cfg, &["url", "webhook_url", "webhookUrl"]).ok_or(ConfigurationError::MissingField("url"))?;
            webhook(url, string(cfg, &["secret", "webhook_secret", "webhookSecret"]))
        }
        "in_app" | "inapp" | "notification" | "notify" => Ok(AlertAction::InApp),
        "bot" | "bot_trigger" | "trade" => {
            let bot_id = id_string(field(cfg, &["bot_id", "botId"])).ok_or(ConfigurationError::MissingField("bot_id"))?;
            Ok(AlertAction::Bot { bot_id })
        }
        "none" | "" => Ok(AlertAction::None),
        other => Err(invalid("action", other)),
    }
}

fn webhook(url: &str, secret: Option<&str>) -> Result<AlertAction, ConfigurationError> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(invalid("url", url));
    }
    Ok(AlertAction::Webhook {
        url: url.to_string(),
        secret: secret.filter(|s| !s.is_empty()).map(str::to_string),
    })
}

fn parse_operator(raw: &str) -> Option<Operator> {
    let op = match raw.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
        ">" | "gt" | "greater_than" | "above" | "greater" => Operator::Gt,
        "<" | "lt" | "less_than" | "below" | "less" => Operator::Lt,
        ">=" | "gte" | "ge" | "greater_or_equal" | "at_least" => Operator::Gte,
        "<=" | "lte" | "le" | "less_or_equal" | "at_most" => Operator::Lte,
        "=" | "==" | "eq" | "equal" | "equals" => Operator::Equals,
        "crosses_above" | "cross_above" | "crossover" | "crosses_over" | "cross_up" => Operator::CrossesAbove,
        "crosses_below" | "cross_below" | "crossunder" | "crosses_under" | "cross_down" => Operator::CrossesBelow,
        "between" | "in_range" | "range" => Operator::Between,
        "pattern" | "detected" | "is" => Operator::Pattern,
        _ => return None,
    };
    Some(op)
}

fn parse_logic(raw: &str) -> Option<Logic> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "AND" | "ALL" | "&&" => Some(Logic::And),
        "OR" | "ANY" | "||" => Some(Logic::Or),
        _ => None,
    }
}

// ── Value helpers ──

/// First present, non-null value among `keys`.
fn field<'a>(obj: &'a Obj, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
}

fn string<'a>(obj: &'a Obj, keys: &[&str]) -> Option<&'a str> {
    field(obj, keys).and_then(Value::as_str)
}

fn id_string(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Numbers may arrive as JSON numbers or numeric strings.
fn number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn invalid(field: &'static str, value: impl std::fmt::Display) -> ConfigurationError {
    ConfigurationError::InvalidField {
        field,
        reason: value.to_string(),
    }
}
