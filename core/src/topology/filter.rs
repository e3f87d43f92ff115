use crate::event::Event;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Inclusive timestamp window in epoch milliseconds; open ends are unbounded
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl TimeRange {
    pub fn contains(&self, timestamp: i64) -> bool {
        self.start.map_or(true, |start| timestamp >= start)
            && self.end.map_or(true, |end| timestamp <= end)
    }
}

/// User-controlled predicates over the event stream.
///
/// Only decides which events feed a projection. A contradictory filter
/// (e.g. a time range whose start is after its end) simply matches nothing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterState {
    /// Case-insensitive substring over endpoint, source and destination
    #[serde(default)]
    pub search: Option<String>,
    /// Allowed status codes; empty allows everything
    #[serde(default)]
    pub status_codes: BTreeSet<u16>,
    #[serde(default)]
    pub time_range: Option<TimeRange>,
    /// Endpoint category (case-insensitive)
    #[serde(default)]
    pub category: Option<String>,
}

impl FilterState {
    pub fn is_empty(&self) -> bool {
        self.search_term().is_none()
            && self.status_codes.is_empty()
            && self.time_range.is_none()
            && self.category_term().is_none()
    }

    fn search_term(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }

    fn category_term(&self) -> Option<&str> {
        self.category.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// A predicate with the search term lowered once
    pub fn matcher(&self) -> impl Fn(&Event) -> bool + '_ {
        let search = self.search_term();
        let category = self.category_term();
        move |event: &Event| {
            if let Some(term) = &search {
                let hit = [&event.endpoint, &event.source, &event.destination]
                    .iter()
                    .any(|field| field.to_lowercase().contains(term.as_str()));
                if !hit {
                    return false;
                }
            }
            if !self.status_codes.is_empty()
                && !event.status.is_some_and(|s| self.status_codes.contains(&s))
            {
                return false;
            }
            if let Some(range) = &self.time_range {
                if !range.contains(event.timestamp) {
                    return false;
                }
            }
            if let Some(category) = category {
                if !event.category().eq_ignore_ascii_case(category) {
                    return false;
                }
            }
            true
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        (self.matcher())(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    fn event() -> Event {
        Event::new("e1", EventKind::Request, 1_000, "/api/Users")
            .with_route("web-client", "user-service")
            .with_status(404)
            .with_category("api")
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = FilterState {
            search: Some("   ".into()),
            ..Default::default()
        };
        assert!(filter.is_empty());
        assert!(filter.matches(&event()));
    }

    #[test]
    fn search_is_case_insensitive_across_fields() {
        for term in ["users", "WEB-CLIENT", "service"] {
            let filter = FilterState {
                search: Some(term.into()),
                ..Default::default()
            };
            assert!(filter.matches(&event()), "term {}", term);
        }
        let filter = FilterState {
            search: Some("billing".into()),
            ..Default::default()
        };
        assert!(!filter.matches(&event()));
    }

    #[test]
    fn status_set_excludes_statusless_events() {
        let filter = FilterState {
            status_codes: [404, 500].into_iter().collect(),
            ..Default::default()
        };
        assert!(filter.matches(&event()));
        assert!(!filter.matches(&Event::new("e2", EventKind::TerminalIo, 0, "pty")));
    }

    #[test]
    fn time_range_is_inclusive_and_contradictions_match_nothing() {
        let inclusive = FilterState {
            time_range: Some(TimeRange {
                start: Some(1_000),
                end: Some(1_000),
            }),
            ..Default::default()
        };
        assert!(inclusive.matches(&event()));

        let inverted = FilterState {
            time_range: Some(TimeRange {
                start: Some(2_000),
                end: Some(500),
            }),
            ..Default::default()
        };
        assert!(!inverted.matches(&event()));
    }

    #[test]
    fn category_falls_back_to_kind() {
        let filter = FilterState {
            category: Some("Terminal_IO".into()),
            ..Default::default()
        };
        assert!(filter.matches(&Event::new("p", EventKind::TerminalIo, 0, "pty")));
        assert!(!filter.matches(&event()));
    }
}
