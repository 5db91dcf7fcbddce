use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, FixedOffset, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tether::Route;

use crate::model::Request;

/// How far back the request list reaches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeFrame {
    Hour,
    #[default]
    Day,
    Week,
    Month,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown time frame {0:?}, expected hour, day, week or month")]
pub struct UnknownTimeFrame(pub String);

impl TimeFrame {
    pub const QUERY_KEY: &'static str = "frame";

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFrame::Hour => "hour",
            TimeFrame::Day => "day",
            TimeFrame::Week => "week",
            TimeFrame::Month => "month",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            TimeFrame::Hour => Duration::hours(1),
            TimeFrame::Day => Duration::days(1),
            TimeFrame::Week => Duration::weeks(1),
            TimeFrame::Month => Duration::days(30),
        }
    }

    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.duration()
    }

    /// A store filter matching records created inside the frame.
    pub fn filter(&self, now: DateTime<Utc>) -> String {
        let since = self.since(now).to_rfc3339_opts(SecondsFormat::Millis, true);
        format!("created >= {}", tether::filter::quote(&since))
    }

    /// Reads the frame from the `frame` query parameter. A missing or unknown value yields `None`.
    pub fn from_route(route: &Route) -> Option<Self> {
        let value = route.query.get(Self::QUERY_KEY)?;
        value
            .parse()
            .inspect_err(|e| log::warn!("Ignoring query parameter: {e}"))
            .ok()
    }
}

impl FromStr for TimeFrame {
    type Err = UnknownTimeFrame;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hour" => Ok(TimeFrame::Hour),
            "day" => Ok(TimeFrame::Day),
            "week" => Ok(TimeFrame::Week),
            "month" => Ok(TimeFrame::Month),
            other => Err(UnknownTimeFrame(other.to_string())),
        }
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatusClasses {
    pub success: usize,
    pub redirect: usize,
    pub client_error: usize,
    pub server_error: usize,
    pub other: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EndpointCount {
    pub endpoint: String,
    pub count: usize,
}

/// Summary numbers for the requests page.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RequestStats {
    pub total: usize,
    pub statuses: StatusClasses,
    pub today: usize,
    pub last_hour: usize,
    pub last_24_hours: usize,
    /// Busiest first.
    pub endpoints: Vec<EndpointCount>,
}

impl RequestStats {
    /// `now` carries the viewer's offset, which decides where "today" starts.
    pub fn compute<'a>(requests: impl IntoIterator<Item = &'a Request>, now: DateTime<FixedOffset>) -> Self {
        let now_utc = now.with_timezone(&Utc);
        let last_hour = now_utc - Duration::hours(1);
        let last_24_hours = now_utc - Duration::hours(24);
        let today_start = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .and_then(|midnight| now.offset().from_local_datetime(&midnight).single())
            .map(|midnight| midnight.with_timezone(&Utc));

        let mut stats = RequestStats::default();
        let mut endpoints: BTreeMap<String, usize> = BTreeMap::new();

        for request in requests {
            stats.total += 1;
            match request.status {
                200..=299 => stats.statuses.success += 1,
                300..=399 => stats.statuses.redirect += 1,
                400..=499 => stats.statuses.client_error += 1,
                500..=599 => stats.statuses.server_error += 1,
                _ => stats.statuses.other += 1,
            }
            *endpoints.entry(endpoint_key(request)).or_default() += 1;

            let Some(created) = request.base.created_at() else {
                log::debug!("Request {} has no readable timestamp", request.base.id);
                continue;
            };
            if today_start.is_some_and(|start| created > start) {
                stats.today += 1;
            }
            if created > last_hour {
                stats.last_hour += 1;
            }
            if created > last_24_hours {
                stats.last_24_hours += 1;
            }
        }

        let mut endpoints: Vec<EndpointCount> = endpoints
            .into_iter()
            .map(|(endpoint, count)| EndpointCount { endpoint, count })
            .collect();
        endpoints.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.endpoint.cmp(&b.endpoint)));
        stats.endpoints = endpoints;
        stats
    }
}

/// `GET /api/v2/homes/123/zones?x=1` becomes `GET /api/v2/homes/{id}/zones`.
fn endpoint_key(request: &Request) -> String {
    let path = Route::parse(&request.url).path;
    let collapsed = path
        .split('/')
        .map(|segment| {
            if !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()) {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/");
    format!("{} {collapsed}", request.method.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Base;
    use std::collections::BTreeMap;

    fn request(id: &str, created: &str, method: &str, url: &str, status: u16) -> Request {
        Request {
            base: Base {
                id: id.to_string(),
                created: created.to_string(),
                updated: created.to_string(),
            },
            token: String::new(),
            method: method.to_string(),
            url: url.to_string(),
            status,
        }
    }

    fn at(text: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(text).unwrap()
    }

    #[test]
    fn test_time_frame_query_round_trip() {
        for frame in [TimeFrame::Hour, TimeFrame::Day, TimeFrame::Week, TimeFrame::Month] {
            let route = Route::new(
                "/requests",
                BTreeMap::from([(TimeFrame::QUERY_KEY.to_string(), frame.to_string())]),
            );
            assert_eq!(TimeFrame::from_route(&route), Some(frame));
        }
        assert_eq!(TimeFrame::from_route(&Route::parse("/requests?frame=year")), None);
        assert_eq!(TimeFrame::from_route(&Route::parse("/requests")), None);
        assert_eq!(
            "decade".parse::<TimeFrame>(),
            Err(UnknownTimeFrame("decade".to_string()))
        );
    }

    #[test]
    fn test_time_frame_filter() {
        let now = at("2024-05-02T12:00:00Z").with_timezone(&Utc);
        assert_eq!(
            TimeFrame::Day.filter(now),
            r#"created >= "2024-05-01T12:00:00.000Z""#
        );
        assert_eq!(TimeFrame::Hour.since(now), at("2024-05-02T11:00:00Z"));
    }

    #[test]
    fn test_request_stats() {
        let requests = vec![
            request("r1", "2024-05-02 11:30:00.000Z", "get", "/api/v2/homes/123/zones", 200),
            request("r2", "2024-05-02 01:00:00.000Z", "GET", "/api/v2/homes/456/zones?ngsw=1", 204),
            request("r3", "2024-05-01 20:00:00.000Z", "PUT", "/api/v2/homes/123/zones/1/overlay", 401),
            request("r4", "2024-04-29 10:00:00.000Z", "GET", "/api/v2/me", 502),
            request("r5", "", "GET", "https://my.tado.com/api/v2/me", 304),
        ];

        let stats = RequestStats::compute(&requests, at("2024-05-02T12:00:00Z"));

        assert_eq!(stats.total, 5);
        assert_eq!(
            stats.statuses,
            StatusClasses {
                success: 2,
                redirect: 1,
                client_error: 1,
                server_error: 1,
                other: 0,
            }
        );
        assert_eq!(stats.last_hour, 1);
        assert_eq!(stats.last_24_hours, 3);
        assert_eq!(stats.today, 2);
        assert_eq!(
            stats.endpoints,
            vec![
                EndpointCount {
                    endpoint: "GET /api/v2/homes/{id}/zones".to_string(),
                    count: 2
                },
                EndpointCount {
                    endpoint: "GET /api/v2/me".to_string(),
                    count: 2
                },
                EndpointCount {
                    endpoint: "PUT /api/v2/homes/{id}/zones/{id}/overlay".to_string(),
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn test_today_follows_the_viewer_offset() {
        let requests = vec![request("r1", "2024-05-01 23:30:00.000Z", "GET", "/", 200)];

        let utc = RequestStats::compute(&requests, at("2024-05-02T06:00:00Z"));
        let berlin = RequestStats::compute(&requests, at("2024-05-02T08:00:00+02:00"));

        assert_eq!(utc.today, 0);
        assert_eq!(berlin.today, 1);
    }
}
