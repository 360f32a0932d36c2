//! Parsers for the carrier policy text formats.
//!
//! Handover rule:
//! `source=<AN>[|<AN>...], target=<AN>[|<AN>...], [roaming=true|false,]
//!  type=<allowed|disallowed>, capabilities=<CAP>[|<CAP>...]`
//!
//! Fallback rule:
//! `cause=<code>[~<code>][|<code>...], time=<ms>[, preference=<cell|wifi>]`
//!
//! Tokens are case-insensitive. A malformed rule is dropped with a warning;
//! the rest of the array still loads.

use nom::{
    bytes::complete::take_while1,
    character::complete::{char, multispace0},
    multi::separated_list1,
    sequence::{delimited, separated_pair},
    IResult,
};
use qnsd_events::{AccessNetwork, SessionType, WfcPreference};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a matching handover is permitted or barred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleKind {
    Allowed,
    Disallowed,
}

/// One ordered handover policy rule. First match wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoverRule {
    pub sources: Vec<AccessNetwork>,
    pub targets: Vec<AccessNetwork>,
    /// `None` matches both coverages.
    pub roaming: Option<bool>,
    pub kind: RuleKind,
    pub capabilities: Vec<SessionType>,
}

impl HandoverRule {
    pub fn matches(
        &self,
        session: SessionType,
        from: AccessNetwork,
        to: AccessNetwork,
        roaming: bool,
    ) -> bool {
        self.sources.contains(&from)
            && self.targets.contains(&to)
            && self.roaming.map_or(true, |r| r == roaming)
            && self.capabilities.contains(&session)
    }
}

impl fmt::Display for HandoverRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source={}", join_ans(&self.sources))?;
        write!(f, ",target={}", join_ans(&self.targets))?;
        if let Some(roaming) = self.roaming {
            write!(f, ",roaming={roaming}")?;
        }
        let kind = match self.kind {
            RuleKind::Allowed => "allowed",
            RuleKind::Disallowed => "disallowed",
        };
        write!(f, ",type={kind}")?;
        let caps = self
            .capabilities
            .iter()
            .map(|c| session_token(*c))
            .collect::<Vec<_>>()
            .join("|");
        write!(f, ",capabilities={caps}")
    }
}

/// Inclusive span of IMS reason codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CauseSpan {
    pub start: u32,
    pub end: u32,
}

impl CauseSpan {
    pub fn covers(&self, code: u32) -> bool {
        (self.start..=self.end).contains(&code)
    }
}

/// Which WFC preference a fallback rule is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallbackPreference {
    Cell,
    Wifi,
}

impl FallbackPreference {
    pub fn applies_to(&self, pref: WfcPreference) -> bool {
        match self {
            FallbackPreference::Cell => pref == WfcPreference::CellularPreferred,
            FallbackPreference::Wifi => matches!(
                pref,
                WfcPreference::WifiPreferred | WfcPreference::WifiOnly
            ),
        }
    }
}

/// Fallback penalty applied when an IMS registration failure matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackRule {
    pub causes: Vec<CauseSpan>,
    pub time_ms: u64,
    pub preference: Option<FallbackPreference>,
}

impl FallbackRule {
    pub fn covers(&self, code: u32) -> bool {
        self.causes.iter().any(|span| span.covers(code))
    }
}

impl fmt::Display for FallbackRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let causes = self
            .causes
            .iter()
            .map(|span| {
                if span.start == span.end {
                    span.start.to_string()
                } else {
                    format!("{}~{}", span.start, span.end)
                }
            })
            .collect::<Vec<_>>()
            .join("|");
        write!(f, "cause={causes},time={}", self.time_ms)?;
        if let Some(pref) = self.preference {
            let pref = match pref {
                FallbackPreference::Cell => "cell",
                FallbackPreference::Wifi => "wifi",
            };
            write!(f, ",preference={pref}")?;
        }
        Ok(())
    }
}

/// Why a rule string was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleParseError {
    #[error("not a key=value list")]
    NotKeyValueList,
    #[error("trailing input {0:?}")]
    TrailingInput(String),
    #[error("unknown key {0:?}")]
    UnknownKey(String),
    #[error("unknown access network {0:?}")]
    UnknownAccessNetwork(String),
    #[error("unknown capability {0:?}")]
    UnknownCapability(String),
    #[error("bad bool {0:?}")]
    BadBool(String),
    #[error("bad rule type {0:?}")]
    BadRuleKind(String),
    #[error("rule names both allowed and disallowed")]
    ConflictingRuleKind,
    #[error("missing {0}")]
    MissingField(&'static str),
    #[error("bad time {0:?}")]
    BadTime(String),
    #[error("unknown preference {0:?}")]
    UnknownPreference(String),
    #[error("bad cause {0:?}")]
    BadCause(String),
    #[error("inverted cause span {0:?}")]
    InvertedCauseSpan(String),
}

/// Diagnostic attached to a skipped rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    pub rule: String,
    pub reason: String,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "skipped rule {:?}: {}", self.rule, self.reason)
    }
}

/// A guaranteed-non-null parse result plus the diagnostics collected on the
/// way. Parsing never fails as a whole.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed<T> {
    pub value: T,
    pub warnings: Vec<ParseWarning>,
}

pub fn parse_handover_rules(rules: &[String]) -> Parsed<Vec<HandoverRule>> {
    let mut value = Vec::new();
    let mut warnings = Vec::new();

    for rule in rules {
        match parse_handover_rule(rule) {
            Ok(parsed) => value.push(parsed),
            Err(reason) => warnings.push(ParseWarning {
                rule: rule.clone(),
                reason: reason.to_string(),
            }),
        }
    }

    Parsed { value, warnings }
}

pub fn parse_fallback_rules(rules: &[String]) -> Parsed<Vec<FallbackRule>> {
    let mut value = Vec::new();
    let mut warnings = Vec::new();

    for rule in rules {
        match parse_fallback_rule(rule) {
            Ok(parsed) => value.push(parsed),
            Err(reason) => warnings.push(ParseWarning {
                rule: rule.clone(),
                reason: reason.to_string(),
            }),
        }
    }

    Parsed { value, warnings }
}

pub fn parse_handover_rule(input: &str) -> Result<HandoverRule, RuleParseError> {
    let pairs = kv_pairs(input)?;

    let mut sources = None;
    let mut targets = None;
    let mut roaming = None;
    let mut kinds: Vec<RuleKind> = Vec::new();
    let mut capabilities = None;

    for (key, value) in pairs {
        match key.to_ascii_lowercase().as_str() {
            "source" => sources = Some(parse_an_list(&value)?),
            "target" => targets = Some(parse_an_list(&value)?),
            "roaming" => roaming = Some(parse_bool(&value)?),
            "type" => kinds.push(parse_rule_kind(&value)?),
            "capabilities" => capabilities = Some(parse_capability_list(&value)?),
            other => return Err(RuleParseError::UnknownKey(other.to_owned())),
        }
    }

    if kinds.contains(&RuleKind::Allowed) && kinds.contains(&RuleKind::Disallowed) {
        return Err(RuleParseError::ConflictingRuleKind);
    }

    Ok(HandoverRule {
        sources: sources.ok_or(RuleParseError::MissingField("source"))?,
        targets: targets.ok_or(RuleParseError::MissingField("target"))?,
        roaming,
        kind: kinds
            .into_iter()
            .next()
            .ok_or(RuleParseError::MissingField("type"))?,
        capabilities: capabilities
            .ok_or(RuleParseError::MissingField("capabilities"))?,
    })
}

pub fn parse_fallback_rule(input: &str) -> Result<FallbackRule, RuleParseError> {
    let pairs = kv_pairs(input)?;

    let mut causes = None;
    let mut time_ms = None;
    let mut preference = None;

    for (key, value) in pairs {
        match key.to_ascii_lowercase().as_str() {
            "cause" => causes = Some(parse_cause_list(&value)?),
            "time" => {
                time_ms = Some(
                    value
                        .parse::<u64>()
                        .map_err(|_| RuleParseError::BadTime(value.clone()))?,
                )
            }
            "preference" => {
                preference = Some(match value.to_ascii_lowercase().as_str() {
                    "cell" => FallbackPreference::Cell,
                    "wifi" => FallbackPreference::Wifi,
                    other => {
                        return Err(RuleParseError::UnknownPreference(
                            other.to_owned(),
                        ))
                    }
                })
            }
            other => return Err(RuleParseError::UnknownKey(other.to_owned())),
        }
    }

    Ok(FallbackRule {
        causes: causes.ok_or(RuleParseError::MissingField("cause"))?,
        time_ms: time_ms.ok_or(RuleParseError::MissingField("time"))?,
        preference,
    })
}

fn kv_pairs(input: &str) -> Result<Vec<(String, String)>, RuleParseError> {
    let result: IResult<&str, Vec<(&str, &str)>> = separated_list1(
        char(','),
        separated_pair(ws(token), char('='), ws(token)),
    )(input);

    match result {
        Ok(("", pairs)) => Ok(pairs
            .into_iter()
            .map(|(k, v)| (k.trim().to_owned(), v.trim().to_owned()))
            .collect()),
        Ok((rest, _)) => Err(RuleParseError::TrailingInput(rest.to_owned())),
        Err(_) => Err(RuleParseError::NotKeyValueList),
    }
}

fn ws<'a, O>(
    inner: impl FnMut(&'a str) -> IResult<&'a str, O>,
) -> impl FnMut(&'a str) -> IResult<&'a str, O> {
    delimited(multispace0, inner, multispace0)
}

fn token(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || "|~+_-".contains(c))(input)
}

fn parse_an_list(value: &str) -> Result<Vec<AccessNetwork>, RuleParseError> {
    value.split('|').map(parse_an).collect()
}

fn parse_an(token: &str) -> Result<AccessNetwork, RuleParseError> {
    match token.trim().to_ascii_uppercase().as_str() {
        "EUTRAN" => Ok(AccessNetwork::Eutran),
        "NGRAN" => Ok(AccessNetwork::Ngran),
        "UTRAN" => Ok(AccessNetwork::Utran),
        "GERAN" => Ok(AccessNetwork::Geran),
        "IWLAN" => Ok(AccessNetwork::Iwlan),
        other => Err(RuleParseError::UnknownAccessNetwork(other.to_owned())),
    }
}

fn parse_bool(value: &str) -> Result<bool, RuleParseError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(RuleParseError::BadBool(other.to_owned())),
    }
}

fn parse_rule_kind(value: &str) -> Result<RuleKind, RuleParseError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "allowed" => Ok(RuleKind::Allowed),
        "disallowed" => Ok(RuleKind::Disallowed),
        other => Err(RuleParseError::BadRuleKind(other.to_owned())),
    }
}

fn parse_capability_list(value: &str) -> Result<Vec<SessionType>, RuleParseError> {
    value
        .split('|')
        .map(|token| match token.trim().to_ascii_uppercase().as_str() {
            "IMS" => Ok(SessionType::Ims),
            "EMERGENCY" | "EIMS" => Ok(SessionType::Emergency),
            "MMS" => Ok(SessionType::Mms),
            "XCAP" => Ok(SessionType::Xcap),
            "CBS" => Ok(SessionType::Cbs),
            other => Err(RuleParseError::UnknownCapability(other.to_owned())),
        })
        .collect()
}

fn parse_cause_list(value: &str) -> Result<Vec<CauseSpan>, RuleParseError> {
    value
        .split('|')
        .map(|span| {
            let span = span.trim();
            match span.split_once('~') {
                Some((start, end)) => {
                    let start = start
                        .trim()
                        .parse::<u32>()
                        .map_err(|_| RuleParseError::BadCause(span.to_owned()))?;
                    let end = end
                        .trim()
                        .parse::<u32>()
                        .map_err(|_| RuleParseError::BadCause(span.to_owned()))?;
                    if start > end {
                        return Err(RuleParseError::InvertedCauseSpan(
                            span.to_owned(),
                        ));
                    }
                    Ok(CauseSpan { start, end })
                }
                None => {
                    let code = span
                        .parse::<u32>()
                        .map_err(|_| RuleParseError::BadCause(span.to_owned()))?;
                    Ok(CauseSpan {
                        start: code,
                        end: code,
                    })
                }
            }
        })
        .collect()
}

fn join_ans(ans: &[AccessNetwork]) -> String {
    ans.iter()
        .map(|an| an_token(*an))
        .collect::<Vec<_>>()
        .join("|")
}

fn an_token(an: AccessNetwork) -> &'static str {
    match an {
        AccessNetwork::Eutran => "EUTRAN",
        AccessNetwork::Ngran => "NGRAN",
        AccessNetwork::Utran => "UTRAN",
        AccessNetwork::Geran => "GERAN",
        AccessNetwork::Iwlan => "IWLAN",
        AccessNetwork::Unknown => "UNKNOWN",
    }
}

fn session_token(session: SessionType) -> &'static str {
    match session {
        SessionType::Ims => "IMS",
        SessionType::Emergency => "EMERGENCY",
        SessionType::Mms => "MMS",
        SessionType::Xcap => "XCAP",
        SessionType::Cbs => "CBS",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_parses_a_full_handover_rule() {
        let rule = parse_handover_rule(
            "source=EUTRAN|NGRAN, target=IWLAN, roaming=false, type=allowed, capabilities=IMS|MMS",
        )
        .unwrap();

        assert_eq!(
            rule.sources,
            vec![AccessNetwork::Eutran, AccessNetwork::Ngran]
        );
        assert_eq!(rule.targets, vec![AccessNetwork::Iwlan]);
        assert_eq!(rule.roaming, Some(false));
        assert_eq!(rule.kind, RuleKind::Allowed);
        assert_eq!(
            rule.capabilities,
            vec![SessionType::Ims, SessionType::Mms]
        );
    }

    #[test]
    fn it_is_case_insensitive() {
        let rule = parse_handover_rule(
            "SOURCE=eutran, Target=iwlan, TYPE=Allowed, capabilities=ims",
        )
        .unwrap();

        assert_eq!(rule.sources, vec![AccessNetwork::Eutran]);
        assert_eq!(rule.kind, RuleKind::Allowed);
    }

    #[test]
    fn it_rejects_a_rule_naming_both_kinds() {
        let err = parse_handover_rule(
            "source=EUTRAN, target=IWLAN, type=allowed, type=disallowed, capabilities=IMS",
        )
        .unwrap_err();

        assert_eq!(err, RuleParseError::ConflictingRuleKind);
    }

    #[test]
    fn it_rejects_unknown_capability_tokens() {
        let err = parse_handover_rule(
            "source=EUTRAN, target=IWLAN, type=allowed, capabilities=TELEPATHY",
        )
        .unwrap_err();

        assert!(matches!(err, RuleParseError::UnknownCapability(_)));
    }

    #[test]
    fn it_drops_only_the_bad_rule_from_an_array() {
        let rules = vec![
            "source=EUTRAN, target=IWLAN, type=allowed, capabilities=IMS".to_owned(),
            "complete nonsense".to_owned(),
            "source=IWLAN, target=EUTRAN, type=allowed, capabilities=IMS".to_owned(),
        ];

        let parsed = parse_handover_rules(&rules);

        assert_eq!(parsed.value.len(), 2);
        assert_eq!(parsed.warnings.len(), 1);
        assert_eq!(parsed.warnings[0].rule, "complete nonsense");
    }

    #[test]
    fn it_round_trips_handover_rules() {
        let text = "source=EUTRAN|NGRAN,target=IWLAN,roaming=true,type=disallowed,capabilities=IMS|EMERGENCY";
        let rule = parse_handover_rule(text).unwrap();
        let reparsed = parse_handover_rule(&rule.to_string()).unwrap();

        assert_eq!(reparsed, rule);
    }

    #[test]
    fn it_parses_fallback_cause_spans() {
        let rule =
            parse_fallback_rule("cause=321~378|1503, time=60000, preference=cell")
                .unwrap();

        assert!(rule.covers(321));
        assert!(rule.covers(350));
        assert!(rule.covers(378));
        assert!(!rule.covers(379));
        assert!(rule.covers(1503));
        assert_eq!(rule.time_ms, 60_000);
        assert_eq!(rule.preference, Some(FallbackPreference::Cell));
    }

    #[test]
    fn it_round_trips_fallback_rules() {
        let rule = parse_fallback_rule("cause=240|321~378, time=90000").unwrap();
        let reparsed = parse_fallback_rule(&rule.to_string()).unwrap();

        assert_eq!(reparsed, rule);
    }

    #[test]
    fn it_rejects_inverted_cause_spans() {
        let err = parse_fallback_rule("cause=378~321, time=1000").unwrap_err();
        assert!(matches!(err, RuleParseError::InvertedCauseSpan(_)));
    }

    #[test]
    fn it_scopes_fallback_preference_filters() {
        assert!(FallbackPreference::Cell.applies_to(WfcPreference::CellularPreferred));
        assert!(!FallbackPreference::Cell.applies_to(WfcPreference::WifiPreferred));
        assert!(FallbackPreference::Wifi.applies_to(WfcPreference::WifiPreferred));
        assert!(FallbackPreference::Wifi.applies_to(WfcPreference::WifiOnly));
        assert!(!FallbackPreference::Wifi.applies_to(WfcPreference::CellularPreferred));
    }
}
