// =============================================================================
// extract.rs - THE JUDGE'S BOX
// =============================================================================
//
// Turns an accepted payload into race records. Three payload shapes show up
// in the wild:
//
//   { "meetings": [ { course, races: [...] }, ... ] }   meeting-nested
//   { "races": [ { course, ... }, ... ] }               race-flat
//   [ { course, ... }, ... ]                            bare list
//
// Anything else is an UnrecognizedSchema and ends the run, with the top-level
// keys in the message so someone can add the fourth shape.
//
// Results keep the first three past the post. Racecards keep everyone, and
// need one extra fetch per meeting to get the races at all.
// =============================================================================

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::metrics::RunMetrics;
use crate::models::{CardMeeting, CardRace, CardRunner, Podium, RaceRecord, Runner};
use crate::normalize::{as_object, first_non_empty, first_truthy, normalize_position, pick, text_of};
use crate::prober::{describe_shape, ProbeAttempt, Prober};

// =============================================================================
// RESULTS
// =============================================================================

/// Walk a results payload into race records, in payload order.
pub fn extract_races(payload: &Value, meeting_date: &str) -> Result<Vec<RaceRecord>> {
    let mut out = Vec::new();

    match payload {
        Value::Object(obj) if obj.contains_key("meetings") => {
            for meeting in list(obj.get("meetings")) {
                let meeting = as_object(meeting);
                let course = pick(meeting, &["course", "venue", "name"]);
                for race in list(meeting.get("races")) {
                    out.push(race_record(meeting_date, &course, as_object(race)));
                }
            }
        }
        Value::Object(obj) if obj.contains_key("races") => {
            for race in list(obj.get("races")) {
                let race = as_object(race);
                let course = pick(race, &["course", "venue", "track"]);
                out.push(race_record(meeting_date, &course, race));
            }
        }
        Value::Array(races) => {
            for race in races {
                let race = as_object(race);
                let course = pick(race, &["course", "venue", "track"]);
                out.push(race_record(meeting_date, &course, race));
            }
        }
        other => {
            return Err(EngineError::UnrecognizedSchema {
                found: describe_shape(other),
            })
        }
    }

    Ok(out)
}

fn race_record(meeting_date: &str, course: &str, race: &Map<String, Value>) -> RaceRecord {
    let race_title = pick(race, &["name", "race_title", "title"]);
    let off_time = pick(race, &["off_time", "scheduled_time", "time"]);

    let mut finishers = Podium::default();
    for entrant in entrants(race, &["entrants", "runners", "horses"]) {
        let entrant = as_object(entrant);
        let position = normalize_position(first_truthy([
            entrant.get("finish_position"),
            entrant.get("position"),
            entrant.get("result"),
        ]));
        let Some(rank) = position else { continue };
        let Some(slot) = finishers.slot_mut(rank) else { continue };

        let runner = podium_runner(entrant);
        if slot.is_some() {
            // First claim at a rank wins. Later claims (dead heats included)
            // are dropped.
            debug!(
                course = course,
                off_time = off_time.as_str(),
                rank = rank,
                horse = runner.horse.as_str(),
                "Rank already filled, dropping later claim"
            );
            continue;
        }
        *slot = Some(runner);
    }

    RaceRecord {
        meeting_date: meeting_date.to_string(),
        course: course.to_string(),
        off_time,
        race_title,
        finishers,
    }
}

fn podium_runner(entrant: &Map<String, Value>) -> Runner {
    Runner {
        horse: pick(entrant, &["horse_name", "name"]),
        jockey: pick(entrant, &["jockey_name", "jockey"]),
        trainer: pick(entrant, &["trainer_name", "trainer"]),
        sp: pick(entrant, &["sp", "starting_price", "price"]),
    }
}

/// The first truthy of `keys`, if it is a list.
fn entrants<'a>(race: &'a Map<String, Value>, keys: &[&str]) -> &'a [Value] {
    list(first_truthy(keys.iter().map(|k| race.get(*k))))
}

fn list(value: Option<&Value>) -> &[Value] {
    match value {
        Some(Value::Array(items)) => items.as_slice(),
        _ => &[],
    }
}

// =============================================================================
// RACECARDS
// =============================================================================

/// Where a meeting's races might live, in the order we ask.
pub fn meeting_races_attempts(meeting_id: &str) -> Vec<ProbeAttempt> {
    let flat = || {
        vec![
            ("meeting_id".to_string(), meeting_id.to_string()),
            ("stage_id".to_string(), meeting_id.to_string()),
            ("meetingId".to_string(), meeting_id.to_string()),
        ]
    };
    vec![
        ProbeAttempt::new(format!("/v1/meetings/{meeting_id}/races"), vec![]),
        ProbeAttempt::new(format!("/meetings/{meeting_id}/races"), vec![]),
        ProbeAttempt::new(format!("/v1/stages/{meeting_id}"), vec![]),
        ProbeAttempt::new(format!("/stages/{meeting_id}"), vec![]),
        ProbeAttempt::new("/v1/races", flat()),
        ProbeAttempt::new("/races", flat()),
    ]
}

/// Race lists: the first truthy of `races`/`events` when it's a list (a
/// stage-detail response uses `events`), or a non-empty bare list.
pub fn accept_race_list(payload: &Value) -> Option<Vec<Value>> {
    match payload {
        Value::Object(obj) => match first_truthy([obj.get("races"), obj.get("events")]) {
            Some(Value::Array(items)) => Some(items.clone()),
            _ => None,
        },
        Value::Array(items) if !items.is_empty() => Some(items.clone()),
        _ => None,
    }
}

/// Fetch and normalize every meeting's races, one meeting at a time.
///
/// Meetings without an id or a course are skipped. A meeting whose races
/// can't be found on any candidate endpoint comes out with no races rather
/// than failing the run.
pub async fn build_cards(
    prober: &Prober<'_>,
    meetings: &[Value],
    meeting_date: &str,
    metrics: &RunMetrics,
) -> Result<Vec<CardMeeting>> {
    let mut out = Vec::new();

    for meeting in meetings {
        let meeting = as_object(meeting);
        let id = text_of(&first_non_empty(
            ["id", "uuid", "meeting_id", "stage_id"].iter().map(|k| meeting.get(*k)),
        ));
        let course = pick(meeting, &["course", "venue", "name"]);
        if id.is_empty() || course.is_empty() {
            debug!(id = id.as_str(), course = course.as_str(), "Skipping meeting without id or course");
            continue;
        }

        let attempts = meeting_races_attempts(&id);
        let menu = format!("races:{id}");
        let races_raw = match prober.run_attempts(&menu, &attempts, accept_race_list).await {
            Ok(accepted) => accepted.value,
            Err(EngineError::ProbeExhausted { last_error, .. }) => {
                warn!(
                    meeting = id.as_str(),
                    course = course.as_str(),
                    last_error = last_error.as_str(),
                    "No races endpoint worked for meeting, publishing it empty"
                );
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let races: Vec<CardRace> = races_raw.iter().map(|r| card_race(as_object(r))).collect();
        info!(
            meeting = id.as_str(),
            course = course.as_str(),
            races = races.len(),
            "Meeting card built"
        );
        metrics.increment_meetings();
        metrics.add_races(races.len());

        out.push(CardMeeting {
            meeting_date: meeting_date.to_string(),
            course,
            races,
        });
    }

    Ok(out)
}

/// A racecard race: every declared runner, no positional filtering.
pub fn card_race(race: &Map<String, Value>) -> CardRace {
    CardRace {
        off_time: pick(race, &["off_time", "time", "scheduled_time"]),
        race_title: pick(race, &["name", "race_title", "title"]),
        runners: entrants(race, &["runners", "entrants", "horses"])
            .iter()
            .map(|e| card_runner(as_object(e)))
            .collect(),
    }
}

fn card_runner(entrant: &Map<String, Value>) -> CardRunner {
    CardRunner {
        no: pick(entrant, &["number", "cloth", "saddlecloth"]),
        horse: pick(entrant, &["horse_name", "name"]),
        jockey: pick(entrant, &["jockey_name", "jockey"]),
        trainer: pick(entrant, &["trainer_name", "trainer"]),
        age: pick(entrant, &["age"]),
        weight: pick(entrant, &["weight", "weight_carried"]),
        draw: pick(entrant, &["draw", "stall"]),
        odds: pick(entrant, &["odds", "forecast_sp", "sp"]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{params, Reply, ScriptedTransport};
    use serde_json::json;

    const DATE: &str = "2025-10-27";

    #[test]
    fn test_meeting_nested_end_to_end() {
        let payload = json!({"meetings":[{"course":"Ascot","races":[{"name":"Handicap","off_time":"14:10","entrants":[{"name":"Horse A","position":"1"},{"name":"Horse B","position":"2"}]}]}]});
        let races = extract_races(&payload, DATE).unwrap();
        assert_eq!(races.len(), 1);

        let race = &races[0];
        assert_eq!(race.course, "Ascot");
        assert_eq!(race.off_time, "14:10");
        assert_eq!(race.race_title, "Handicap");
        assert_eq!(race.meeting_date, DATE);
        assert_eq!(race.finishers.first.as_ref().unwrap().horse, "Horse A");
        assert_eq!(race.finishers.second.as_ref().unwrap().horse, "Horse B");
        assert!(race.finishers.third.is_none());

        let as_json = serde_json::to_value(race).unwrap();
        assert!(as_json["finishers"]["3"].is_null());
    }

    #[test]
    fn test_dead_heat_first_claim_wins() {
        let payload = json!({"races":[{"course":"York","runners":[
            {"horse_name":"First Past","position":"1="},
            {"horse_name":"Also First","position":"1="},
            {"horse_name":"Third Home","finish_position":3}
        ]}]});
        let races = extract_races(&payload, DATE).unwrap();
        let podium = &races[0].finishers;
        assert_eq!(podium.first.as_ref().unwrap().horse, "First Past");
        assert!(podium.second.is_none());
        assert_eq!(podium.third.as_ref().unwrap().horse, "Third Home");
    }

    #[test]
    fn test_race_flat_course_fallbacks() {
        let payload = json!({"races":[
            {"venue":"Kempton","title":"Novice Stakes","scheduled_time":"1905","horses":[]},
            {"track":"Dundalk","race_title":"Maiden","time":"20:30"}
        ]});
        let races = extract_races(&payload, DATE).unwrap();
        assert_eq!(races[0].course, "Kempton");
        assert_eq!(races[0].race_title, "Novice Stakes");
        assert_eq!(races[0].off_time, "1905");
        assert_eq!(races[1].course, "Dundalk");
        assert_eq!(races[1].off_time, "20:30");
        assert_eq!(races[1].finishers.filled(), 0);
    }

    #[test]
    fn test_bare_list_payload() {
        let payload = json!([{"course":"Leopardstown","name":"Listed","entrants":[
            {"name":"Winner","jockey_name":"J Doe","trainer":"T Smith","starting_price":"5/2","result":"1"}
        ]}]);
        let races = extract_races(&payload, DATE).unwrap();
        let winner = races[0].finishers.first.as_ref().unwrap();
        assert_eq!(winner.jockey, "J Doe");
        assert_eq!(winner.trainer, "T Smith");
        assert_eq!(winner.sp, "5/2");
    }

    #[test]
    fn test_malformed_entrants_degrade_gracefully() {
        let payload = json!({"meetings":[{"name":"Ayr","races":[{"entrants":[
            {"name":"Pulled Up","position":"PU"},
            "not an object",
            {"position":"2"},
            {"name":"Fourth","position":"4"}
        ]}]}]});
        let races = extract_races(&payload, DATE).unwrap();
        let race = &races[0];
        assert_eq!(race.course, "Ayr");
        assert_eq!(race.race_title, "");
        assert!(race.finishers.first.is_none());
        assert_eq!(race.finishers.second.as_ref(), Some(&Runner::default()));
        assert!(race.finishers.third.is_none());
    }

    #[test]
    fn test_position_falls_through_empty_finish_position() {
        let payload = json!({"races":[{"entrants":[{"name":"Late Lunge","finish_position":"","position":"2"}]}]});
        let races = extract_races(&payload, DATE).unwrap();
        assert_eq!(races[0].finishers.second.as_ref().unwrap().horse, "Late Lunge");
    }

    #[test]
    fn test_unrecognized_schema_lists_keys() {
        let err = extract_races(&json!({"data": [], "meta": {}}), DATE).unwrap_err();
        match err {
            EngineError::UnrecognizedSchema { found } => {
                assert!(found.contains("data"));
                assert!(found.contains("meta"));
            }
            other => panic!("expected UnrecognizedSchema, got {other:?}"),
        }
        assert!(extract_races(&json!("hello"), DATE).is_err());
    }

    #[test]
    fn test_card_race_keeps_all_runners() {
        let race = json!({"off_time":"13:45","name":"Juvenile Hurdle","runners":[
            {"number":1,"horse_name":"Alpha","jockey":"A Rider","age":4,"weight":"11-0","stall":"3","forecast_sp":"2/1"},
            {"cloth":"2","name":"Bravo","weight_carried":"10-12","draw":"","sp":"7/2"}
        ]});
        let card = card_race(as_object(&race));
        assert_eq!(card.off_time, "13:45");
        assert_eq!(card.race_title, "Juvenile Hurdle");
        assert_eq!(card.runners.len(), 2);
        assert_eq!(card.runners[0].no, "1");
        assert_eq!(card.runners[0].age, "4");
        assert_eq!(card.runners[0].draw, "3");
        assert_eq!(card.runners[0].odds, "2/1");
        assert_eq!(card.runners[1].no, "2");
        assert_eq!(card.runners[1].weight, "10-12");
        assert_eq!(card.runners[1].draw, "");
        assert_eq!(card.runners[1].odds, "7/2");
    }

    #[test]
    fn test_meeting_races_attempt_order() {
        let attempts = meeting_races_attempts("m42");
        let paths: Vec<&str> = attempts.iter().map(|a| a.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "/v1/meetings/m42/races",
                "/meetings/m42/races",
                "/v1/stages/m42",
                "/stages/m42",
                "/v1/races",
                "/races",
            ]
        );
        assert!(attempts[0].params.is_empty());
        assert_eq!(
            attempts[5].params,
            params(&[("meeting_id", "m42"), ("stage_id", "m42"), ("meetingId", "m42")])
        );
    }

    #[test]
    fn test_accept_race_list_variants() {
        assert_eq!(accept_race_list(&json!({"races": [1]})).unwrap().len(), 1);
        assert_eq!(accept_race_list(&json!({"races": [], "events": [1, 2]})).unwrap().len(), 2);
        assert!(accept_race_list(&json!({"races": []})).is_none());
        assert!(accept_race_list(&json!([])).is_none());
    }

    #[tokio::test]
    async fn test_build_cards_fans_out_per_meeting() {
        let transport = ScriptedTransport::new()
            .on_path(
                "/stages/7",
                Reply::Json(json!({"events":[{"time":"14:00","title":"Chase","entrants":[{"name":"Solo"}]}]})),
            )
            .on_path(
                "/v1/meetings/abc/races",
                Reply::Json(json!({"races":[{"off_time":"15:00","name":"Bumper","runners":[]}]})),
            );
        let metrics = RunMetrics::new();
        let prober = Prober::new(&transport, &metrics);

        let meetings = vec![
            json!({"id": 7, "venue": "Cheltenham"}),
            json!({"uuid": "abc", "course": "Sandown"}),
            json!({"course": "No Id Park"}),
            json!({"id": "nowhere", "name": "Ghost Downs"}),
        ];
        let cards = build_cards(&prober, &meetings, DATE, &metrics).await.unwrap();

        assert_eq!(cards.len(), 3);
        assert_eq!(cards[0].course, "Cheltenham");
        assert_eq!(cards[0].races[0].race_title, "Chase");
        assert_eq!(cards[0].races[0].runners[0].horse, "Solo");
        assert_eq!(cards[1].course, "Sandown");
        assert_eq!(cards[1].races[0].off_time, "15:00");
        assert_eq!(cards[2].course, "Ghost Downs");
        assert!(cards[2].races.is_empty());

        // Meeting 7 answered on its fourth candidate; nothing after that was asked.
        let calls = transport.calls();
        let seven: Vec<&str> = calls
            .iter()
            .filter(|c| c.path.contains("/7"))
            .map(|c| c.path.as_str())
            .collect();
        assert_eq!(seven, vec!["/v1/meetings/7/races", "/meetings/7/races", "/v1/stages/7", "/stages/7"]);
        assert_eq!(metrics.snapshot().meetings_fetched, 3);
    }
}
