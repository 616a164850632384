//! Encoding-rule tables
//!
//! Tag/value attributes are interned per index: a rule is a small integer
//! id mapping to `(tag, value)` (map rules also carry a rendering kind).
//! Ids are assigned from 1; id 0 is reserved. Rules may arrive out of
//! order, so both tables grow with placeholder slots.
//!
//! Routing rules can be *conditional*: the tag ends in `:conditional` and
//! the value is a `value @ (schedule)` list. After the table is loaded,
//! every alternative is bound to the id of the plain rule it activates,
//! an integer closure over the same table.

use once_cell::sync::OnceCell;
use rustc_hash::FxHashMap;
use tracing::warn;

/// A map-rendering encoding rule.
#[derive(Debug, Clone)]
pub struct MapRule {
    pub tag: String,
    pub value: String,
    /// Rendering kind from the file (primitive / polyline / point / text).
    pub kind: u32,
}

/// Per-map-index rule table: dense by id, O(1) decode.
#[derive(Debug, Default)]
pub struct MapRuleTable {
    rules: Vec<Option<MapRule>>,
    pub name_rule: Option<u32>,
    pub ref_rule: Option<u32>,
    pub coastline_rule: Option<u32>,
}

impl MapRuleTable {
    pub fn init_rule(&mut self, id: u32, kind: u32, tag: String, value: String) {
        let id = id as usize;
        while self.rules.len() <= id {
            self.rules.push(None);
        }
        self.rules[id] = Some(MapRule { tag, value, kind });
    }

    pub fn decode(&self, id: u32) -> Option<&MapRule> {
        self.rules.get(id as usize).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Cache the well-known ids once all rules are read.
    pub fn finish(&mut self) {
        for (id, rule) in self.rules.iter().enumerate() {
            let Some(rule) = rule else { continue };
            match (rule.tag.as_str(), rule.value.as_str()) {
                ("name", _) => self.name_rule = Some(id as u32),
                ("ref", _) => self.ref_rule = Some(id as u32),
                ("natural", "coastline") => self.coastline_rule = Some(id as u32),
                _ => {}
            }
        }
    }
}

/// One alternative of a conditional rule: when `condition` holds, the rule
/// behaves as `(non-conditional tag, value)`, bound to `rule_id` by
/// [`RouteRuleTable::complete_conditional`].
#[derive(Debug, Clone)]
pub struct RuleCondition {
    pub condition: String,
    pub value: String,
    pub rule_id: Option<u32>,
}

/// A routing encoding rule with flags derived on insertion.
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub tag: String,
    pub value: String,
    /// -1 against geometry order, +1 along it, 0 not a oneway rule.
    pub oneway: i8,
    pub roundabout: bool,
    conditions: Vec<RuleCondition>,
}

impl RouteRule {
    pub fn new(tag: String, value: String) -> RouteRule {
        let oneway = if tag == "oneway" {
            match value.as_str() {
                "-1" | "reverse" => -1,
                "1" | "yes" | "true" => 1,
                _ => 0,
            }
        } else {
            0
        };
        let roundabout = (tag == "roundabout" && value == "yes")
            || (tag == "junction" && value == "roundabout");

        let conditions = if tag.ends_with(":conditional") && value.contains('@') {
            parse_conditions(&value)
        } else {
            Vec::new()
        };

        RouteRule { tag, value, oneway, roundabout, conditions }
    }

    pub fn conditional(&self) -> bool {
        !self.conditions.is_empty()
    }

    /// The tag this rule stands in for when one of its schedules is active.
    pub fn non_conditional_tag(&self) -> &str {
        self.tag.strip_suffix(":conditional").unwrap_or(&self.tag)
    }

    pub fn conditions(&self) -> &[RuleCondition] {
        &self.conditions
    }

    /// Id of the first alternative whose schedule covers `time`.
    pub fn conditional_value(&self, time: &TimeOfWeek) -> Option<u32> {
        self.conditions
            .iter()
            .find(|c| condition_matches(&c.condition, time))
            .and_then(|c| c.rule_id)
    }
}

/// Split `"no @ (Mo-Fr 07:00-09:00); yes @ (Sa,Su)"` into alternatives.
fn parse_conditions(value: &str) -> Vec<RuleCondition> {
    let mut out = Vec::new();
    for part in value.split(';') {
        let Some((v, cond)) = part.split_once('@') else { continue };
        let v = v.trim();
        let cond = cond.trim();
        if v.is_empty() || cond.is_empty() {
            continue;
        }
        out.push(RuleCondition {
            condition: cond.to_string(),
            value: v.to_string(),
            rule_id: None,
        });
    }
    out
}

/// Per-routing-index rule table.
#[derive(Debug, Default)]
pub struct RouteRuleTable {
    rules: Vec<Option<RouteRule>>,
    decoded: OnceCell<FxHashMap<(String, String), u32>>,

    // Well-known rule slots, filled as rules arrive.
    pub name_rule: Option<u32>,
    pub ref_rule: Option<u32>,
    pub destination_rule: Option<u32>,
    pub destination_ref_rule: Option<u32>,
    pub traffic_signals: Option<u32>,
    pub traffic_signals_forward: Option<u32>,
    pub traffic_signals_backward: Option<u32>,
    pub stop_sign: Option<u32>,
    pub stop_minor: Option<u32>,
    pub give_way: Option<u32>,
    pub direction_forward: Option<u32>,
    pub direction_backward: Option<u32>,
    pub maxheight_forward: Option<u32>,
    pub maxheight_backward: Option<u32>,
}

impl RouteRuleTable {
    /// Insert at `id`, extending the table with empty slots as needed.
    pub fn init_rule(&mut self, id: u32, tag: String, value: String) {
        let rule = RouteRule::new(tag, value);
        self.note_well_known(id, &rule);
        let id = id as usize;
        while self.rules.len() <= id {
            self.rules.push(None);
        }
        self.rules[id] = Some(rule);
    }

    fn note_well_known(&mut self, id: u32, rule: &RouteRule) {
        let tag = rule.tag.as_str();
        let value = rule.value.as_str();
        if tag == "name" {
            self.name_rule = Some(id);
        } else if tag == "ref" {
            self.ref_rule = Some(id);
        } else if tag == "destination"
            || tag == "destination:forward"
            || tag == "destination:backward"
            || tag.starts_with("destination:lang:")
        {
            self.destination_rule = Some(id);
        } else if tag == "destination:ref"
            || tag == "destination:ref:forward"
            || tag == "destination:ref:backward"
        {
            self.destination_ref_rule = Some(id);
        } else if tag == "highway" && value == "traffic_signals" {
            self.traffic_signals = Some(id);
        } else if tag == "stop" && value == "minor" {
            self.stop_minor = Some(id);
        } else if tag == "highway" && value == "stop" {
            self.stop_sign = Some(id);
        } else if tag == "highway" && value == "give_way" {
            self.give_way = Some(id);
        } else if tag == "traffic_signals:direction" {
            if value == "forward" {
                self.traffic_signals_forward = Some(id);
            } else if value == "backward" {
                self.traffic_signals_backward = Some(id);
            }
        } else if tag == "direction" {
            if value == "forward" {
                self.direction_forward = Some(id);
            } else if value == "backward" {
                self.direction_backward = Some(id);
            }
        } else if tag == "maxheight:forward" && !value.is_empty() {
            self.maxheight_forward = Some(id);
        } else if tag == "maxheight:backward" && !value.is_empty() {
            self.maxheight_backward = Some(id);
        }
    }

    pub fn get(&self, id: u32) -> Option<&RouteRule> {
        self.rules.get(id as usize).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Linear scan, then append. Only used while closing the table, before
    /// the lazy search index exists.
    pub fn find_or_create(&mut self, tag: &str, value: &str) -> u32 {
        for (i, rule) in self.rules.iter().enumerate() {
            if let Some(r) = rule {
                if r.tag == tag && r.value == value {
                    return i as u32;
                }
            }
        }
        let id = self.rules.len().max(1) as u32;
        self.init_rule(id, tag.to_string(), value.to_string());
        id
    }

    /// `(tag, value)` to id; the index is built once, on first call.
    pub fn search(&self, tag: &str, value: &str) -> Option<u32> {
        let map = self.decoded.get_or_init(|| {
            let mut m = FxHashMap::default();
            for (i, rule) in self.rules.iter().enumerate().skip(1) {
                if let Some(r) = rule {
                    m.insert((r.tag.clone(), r.value.clone()), i as u32);
                }
            }
            m
        });
        map.get(&(tag.to_string(), value.to_string())).copied()
    }

    /// Bind every conditional alternative to the rule id it activates.
    pub fn complete_conditional(&mut self) {
        let mut pending = Vec::new();
        for (i, rule) in self.rules.iter().enumerate() {
            let Some(r) = rule else { continue };
            if !r.conditional() {
                continue;
            }
            let tag = r.non_conditional_tag().to_string();
            if tag.is_empty() {
                continue;
            }
            for (ci, c) in r.conditions.iter().enumerate() {
                if !c.value.is_empty() {
                    pending.push((i, ci, tag.clone(), c.value.clone()));
                }
            }
        }
        for (rule_idx, cond_idx, tag, value) in pending {
            let id = self.find_or_create(&tag, &value);
            if let Some(Some(rule)) = self.rules.get_mut(rule_idx) {
                rule.conditions[cond_idx].rule_id = Some(id);
            }
        }
    }

    /// Resolve a rule id coming from a data block; unknown ids are dropped
    /// by the caller.
    pub fn decode_checked(&self, id: u32) -> Option<&RouteRule> {
        let r = self.get(id);
        if r.is_none() {
            warn!(id, "route encoding rule id outside table");
        }
        r
    }
}

/// A wall-clock instant reduced to what road schedules test: weekday
/// (0 = Monday) and minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfWeek {
    pub day: u8,
    pub minutes: u16,
}

impl TimeOfWeek {
    pub fn new(day: u8, hour: u16, minute: u16) -> TimeOfWeek {
        TimeOfWeek { day: day % 7, minutes: hour * 60 + minute }
    }
}

const DAY_NAMES: [&str; 7] = ["Mo", "Tu", "We", "Th", "Fr", "Sa", "Su"];

fn day_index(name: &str) -> Option<u8> {
    DAY_NAMES.iter().position(|d| *d == name).map(|i| i as u8)
}

fn parse_minutes(s: &str) -> Option<u16> {
    let (h, m) = s.split_once(':')?;
    let h: u16 = h.parse().ok()?;
    let m: u16 = m.parse().ok()?;
    if h > 24 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

fn day_spec_matches(spec: &str, day: u8) -> Option<bool> {
    let mut matched = false;
    for item in spec.split(',') {
        if let Some((a, b)) = item.split_once('-') {
            let a = day_index(a)?;
            let b = day_index(b)?;
            let hit = if a <= b {
                (a..=b).contains(&day)
            } else {
                // wrap-around range, e.g. Sa-Tu
                day >= a || day <= b
            };
            matched |= hit;
        } else {
            matched |= day_index(item)? == day;
        }
    }
    Some(matched)
}

fn time_spec_matches(spec: &str, minutes: u16) -> Option<bool> {
    let mut matched = false;
    for item in spec.split(',') {
        let (a, b) = item.split_once('-')?;
        let a = parse_minutes(a)?;
        let b = parse_minutes(b)?;
        matched |= a <= minutes && minutes < b;
    }
    Some(matched)
}

/// Evaluate the weekday/time-of-day subset of the schedule syntax used by
/// conditional road rules (`Mo-Fr 07:00-09:00`, `Sa,Su`, `24/7`).
/// Anything unparseable counts as inactive.
pub fn condition_matches(condition: &str, time: &TimeOfWeek) -> bool {
    let c = condition.trim();
    let c = c.strip_prefix('(').unwrap_or(c);
    let c = c.strip_suffix(')').unwrap_or(c).trim();
    if c == "24/7" {
        return true;
    }

    let mut day_ok: Option<bool> = None;
    let mut time_ok: Option<bool> = None;
    for token in c.split_whitespace() {
        if token.contains(':') {
            match time_spec_matches(token, time.minutes) {
                Some(hit) => time_ok = Some(time_ok.unwrap_or(false) | hit),
                None => return false,
            }
        } else {
            match day_spec_matches(token, time.day) {
                Some(hit) => day_ok = Some(day_ok.unwrap_or(false) | hit),
                None => return false,
            }
        }
    }
    if day_ok.is_none() && time_ok.is_none() {
        return false;
    }
    day_ok.unwrap_or(true) && time_ok.unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_table_dense_ids() {
        let mut t = MapRuleTable::default();
        t.init_rule(5, 0, "highway".into(), "residential".into());
        t.init_rule(1, 0, "natural".into(), "coastline".into());
        t.init_rule(2, 1, "name".into(), String::new());
        t.finish();

        assert_eq!(t.decode(5).unwrap().value, "residential");
        assert!(t.decode(3).is_none());
        assert!(t.decode(0).is_none());
        assert_eq!(t.coastline_rule, Some(1));
        assert_eq!(t.name_rule, Some(2));
    }

    #[test]
    fn route_rule_flags() {
        let r = RouteRule::new("oneway".into(), "yes".into());
        assert_eq!(r.oneway, 1);
        let r = RouteRule::new("oneway".into(), "-1".into());
        assert_eq!(r.oneway, -1);
        let r = RouteRule::new("junction".into(), "roundabout".into());
        assert!(r.roundabout);
        let r = RouteRule::new("highway".into(), "primary".into());
        assert_eq!(r.oneway, 0);
        assert!(!r.roundabout && !r.conditional());
    }

    #[test]
    fn conditional_parsing_and_closure() {
        let mut t = RouteRuleTable::default();
        t.init_rule(1, "highway".into(), "primary".into());
        t.init_rule(2, "access:conditional".into(), "no @ (Mo-Fr 07:00-09:00)".into());
        t.complete_conditional();

        let cond = t.get(2).unwrap();
        assert!(cond.conditional());
        assert_eq!(cond.non_conditional_tag(), "access");

        // the alternative was appended and bound
        let bound = cond.conditions()[0].rule_id.expect("closure bound the alternative");
        let target = t.get(bound).unwrap();
        assert_eq!((target.tag.as_str(), target.value.as_str()), ("access", "no"));

        // every alternative references an existing id
        for id in 1..t.len() as u32 {
            if let Some(r) = t.get(id) {
                for c in r.conditions() {
                    let rid = c.rule_id.expect("bound");
                    assert!(t.get(rid).is_some(), "condition points at missing rule {rid}");
                }
            }
        }
    }

    #[test]
    fn conditional_closure_reuses_existing_rule() {
        let mut t = RouteRuleTable::default();
        t.init_rule(1, "access".into(), "no".into());
        t.init_rule(2, "access:conditional".into(), "no @ (Mo-Fr 07:00-09:00)".into());
        let before = t.len();
        t.complete_conditional();
        assert_eq!(t.len(), before, "no new rule when the target already exists");
        assert_eq!(t.get(2).unwrap().conditions()[0].rule_id, Some(1));
    }

    #[test]
    fn search_builds_lazy_index() {
        let mut t = RouteRuleTable::default();
        t.init_rule(1, "highway".into(), "primary".into());
        t.init_rule(2, "highway".into(), "secondary".into());
        assert_eq!(t.search("highway", "secondary"), Some(2));
        assert_eq!(t.search("highway", "tertiary"), None);
    }

    #[test]
    fn well_known_slots() {
        let mut t = RouteRuleTable::default();
        t.init_rule(1, "name".into(), String::new());
        t.init_rule(2, "highway".into(), "traffic_signals".into());
        t.init_rule(3, "maxheight:forward".into(), "3.5".into());
        t.init_rule(4, "destination:ref".into(), String::new());
        assert_eq!(t.name_rule, Some(1));
        assert_eq!(t.traffic_signals, Some(2));
        assert_eq!(t.maxheight_forward, Some(3));
        assert_eq!(t.destination_ref_rule, Some(4));
    }

    #[test]
    fn schedule_evaluation() {
        let tue_8 = TimeOfWeek::new(1, 8, 0);
        let tue_10 = TimeOfWeek::new(1, 10, 0);
        let sat_8 = TimeOfWeek::new(5, 8, 0);

        assert!(condition_matches("(Mo-Fr 07:00-09:00)", &tue_8));
        assert!(!condition_matches("(Mo-Fr 07:00-09:00)", &tue_10));
        assert!(!condition_matches("(Mo-Fr 07:00-09:00)", &sat_8));
        assert!(condition_matches("Sa,Su", &sat_8));
        assert!(!condition_matches("Sa,Su", &tue_8));
        assert!(condition_matches("24/7", &tue_10));
        assert!(condition_matches("07:00-09:00", &sat_8));
        // wrap-around day range
        assert!(condition_matches("Sa-Tu", &tue_8));
        assert!(!condition_matches("Sa-Tu", &TimeOfWeek::new(3, 8, 0)));
        // end of a window is exclusive
        assert!(!condition_matches("Mo-Fr 07:00-09:00", &TimeOfWeek::new(1, 9, 0)));
        // garbage is inactive, not an error
        assert!(!condition_matches("sunrise-sunset", &tue_8));
        assert!(!condition_matches("", &tue_8));
    }

    #[test]
    fn conditional_value_picks_matching_alternative() {
        let mut t = RouteRuleTable::default();
        t.init_rule(1, "highway".into(), "primary".into());
        t.init_rule(
            2,
            "access:conditional".into(),
            "no @ (Mo-Fr 07:00-09:00); delivery @ (Sa,Su)".into(),
        );
        t.complete_conditional();

        let rule = t.get(2).unwrap();
        let weekday = rule.conditional_value(&TimeOfWeek::new(1, 8, 0)).unwrap();
        assert_eq!(t.get(weekday).unwrap().value, "no");
        let weekend = rule.conditional_value(&TimeOfWeek::new(6, 12, 0)).unwrap();
        assert_eq!(t.get(weekend).unwrap().value, "delivery");
        assert!(rule.conditional_value(&TimeOfWeek::new(2, 23, 0)).is_none());
    }
}
