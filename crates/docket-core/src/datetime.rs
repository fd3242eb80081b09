use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  Local,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  Timelike,
  Weekday
};
use regex::Regex;

pub const MINUTES_PER_DAY: u32 = 24 * 60;

const TIMESTAMP_MINUTES_FMT: &str =
  "%Y-%m-%dT%H:%M";
const TIMESTAMP_SECONDS_FMT: &str =
  "%Y-%m-%dT%H:%M:%S%.f";

#[must_use]
pub fn minutes_of_day(
  dt: NaiveDateTime
) -> u32 {
  dt.hour() * 60 + dt.minute()
}

#[must_use]
pub fn start_of_day(
  day: NaiveDate
) -> NaiveDateTime {
  day.and_time(NaiveTime::MIN)
}

/// Last representable instant of `day` at millisecond precision.
#[must_use]
pub fn end_of_day(
  day: NaiveDate
) -> NaiveDateTime {
  start_of_day(day)
    + Duration::days(1)
    - Duration::milliseconds(1)
}

/// Formats a local timestamp the way it is stored.
///
/// Whole minutes use the short `YYYY-MM-DDTHH:MM` form; anything finer
/// keeps seconds and fractions so the value reloads unchanged.
#[must_use]
pub fn format_local_timestamp(
  dt: NaiveDateTime
) -> String {
  if dt.second() == 0
    && dt.nanosecond() == 0
  {
    dt.format(TIMESTAMP_MINUTES_FMT)
      .to_string()
  } else {
    dt.format(TIMESTAMP_SECONDS_FMT)
      .to_string()
  }
}

pub fn parse_local_timestamp(
  raw: &str
) -> Option<NaiveDateTime> {
  let token = raw.trim();
  for fmt in [
    TIMESTAMP_MINUTES_FMT,
    TIMESTAMP_SECONDS_FMT,
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S%.f"
  ] {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return Some(ndt);
    }
  }

  DateTime::parse_from_rfc3339(token)
    .ok()
    .map(|dt| {
      dt.with_timezone(&Local)
        .naive_local()
    })
}

/// Resolves a user date expression against the local wall clock.
#[tracing::instrument(skip(now), fields(input = input))]
pub fn parse_date_expr(
  input: &str,
  now: NaiveDateTime
) -> anyhow::Result<NaiveDateTime> {
  resolve_date_expr(input, now, false)
}

/// Resolves the end of a window with `start` as the reference instant.
///
/// A bare clock time equal to `start` stays on the same day, so a
/// zero-length window can be entered.
#[tracing::instrument(skip(start), fields(input = input))]
pub fn parse_end_expr(
  input: &str,
  start: NaiveDateTime
) -> anyhow::Result<NaiveDateTime> {
  resolve_date_expr(input, start, true)
}

fn resolve_date_expr(
  input: &str,
  now: NaiveDateTime,
  allow_same_instant: bool
) -> anyhow::Result<NaiveDateTime> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  if lower == "now" {
    return Ok(now);
  }

  if let Some(ndt) =
    parse_local_timestamp(token)
  {
    return Ok(ndt);
  }

  if let Some(date) =
    parse_day_keyword(&lower, now.date())
  {
    return Ok(start_of_day(date));
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return Ok(start_of_day(date));
  }

  if let Some((hour, minute)) =
    parse_clock_time(token)
  {
    let today = now.date();
    let candidate = today
      .and_hms_opt(hour, minute, 0)
      .ok_or_else(|| {
        anyhow!(
          "failed to construct clock \
           time candidate"
        )
      })?;
    if candidate > now
      || (allow_same_instant
        && candidate == now)
    {
      return Ok(candidate);
    }
    return Ok(
      candidate + Duration::days(1)
    );
  }

  if let Some((day_part, clock_part)) =
    token.split_once(char::is_whitespace)
    && let Some((hour, minute)) =
      parse_clock_time(clock_part)
  {
    let day =
      parse_day_expr(day_part, now.date())?;
    return day
      .and_hms_opt(hour, minute, 0)
      .ok_or_else(|| {
        anyhow!(
          "failed to construct \
           {day_part} at {clock_part}"
        )
      });
  }

  if let Some(duration) =
    parse_relative_offset(token)?
  {
    return now
      .checked_add_signed(duration)
      .ok_or_else(|| {
        anyhow!(
          "relative offset out of \
           range: {input}"
        )
      });
  }

  Err(anyhow!(
    "unrecognized date expression: \
     {input}"
  ))
  .with_context(|| {
    "supported formats: now, \
     today/tomorrow/yesterday, weekday \
     names (e.g. monday), clock times \
     (e.g. 3:23pm or 15:23), \
     '<day> <clock>' (e.g. tomorrow \
     9:00), +Nd/+Nh/+Nm, YYYY-MM-DD, \
     YYYY-MM-DDTHH:MM, YYYY-MM-DD HH:MM, \
     RFC3339"
  })
}

/// Resolves a calendar day expression (`today`, `friday`, `2024-01-05`, ...).
pub fn parse_day_expr(
  input: &str,
  today: NaiveDate
) -> anyhow::Result<NaiveDate> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  if let Some(date) =
    parse_day_keyword(&lower, today)
  {
    return Ok(date);
  }

  NaiveDate::parse_from_str(
    token, "%Y-%m-%d"
  )
  .with_context(|| {
    format!(
      "unrecognized day expression: \
       {input} (expected \
       today/tomorrow/yesterday, a \
       weekday name or YYYY-MM-DD)"
    )
  })
}

fn parse_day_keyword(
  lower: &str,
  today: NaiveDate
) -> Option<NaiveDate> {
  match lower {
    | "today" => Some(today),
    | "tomorrow" => today.succ_opt(),
    | "yesterday" => today.pred_opt(),
    | other => {
      parse_weekday_name(other).map(
        |weekday| {
          next_weekday_date(
            today, weekday
          )
        }
      )
    }
  }
}

fn parse_relative_offset(
  token: &str
) -> anyhow::Result<Option<Duration>> {
  let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dhm])$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

  let Some(caps) =
    rel_re.captures(token)
  else {
    return Ok(None);
  };

  let num: i64 = caps["num"]
    .parse()
    .context(
      "invalid relative number"
    )?;
  let duration = match &caps["unit"] {
    | "d" => Duration::try_days(num),
    | "h" => Duration::try_hours(num),
    | "m" => Duration::try_minutes(num),
    | unit => {
      return Err(anyhow!(
        "unknown relative unit: \
         {unit}"
      ))
    }
  }
  .ok_or_else(|| {
    anyhow!(
      "relative offset out of range: \
       {token}"
    )
  })?;

  Ok(Some(
    if &caps["sign"] == "-" {
      -duration
    } else {
      duration
    }
  ))
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = from
    .weekday()
    .num_days_from_monday()
    as i64;
  let target_idx = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  from
    .checked_add_signed(Duration::days(
      delta
    ))
    .unwrap_or(from)
}

fn parse_clock_time(
  token: &str
) -> Option<(u32, u32)> {
  let clock_re = Regex::new(
    r"(?i)^(?P<hour>\d{1,2})(:(?P<minute>\d{2}))?\s*(?P<ampm>[ap]m)?$",
  )
  .ok()?;
  let captures =
    clock_re.captures(token.trim())?;

  let raw_hour = captures
    .name("hour")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  let minute = match captures
    .name("minute")
  {
    | Some(m) => {
      m.as_str().parse::<u32>().ok()?
    }
    | None => 0
  };
  if minute > 59 {
    return None;
  }

  let hour = if let Some(ampm_match) =
    captures.name("ampm")
  {
    let ampm = ampm_match
      .as_str()
      .to_ascii_lowercase();
    if raw_hour == 0 || raw_hour > 12 {
      return None;
    }
    match ampm.as_str() {
      | "am" => raw_hour % 12,
      | "pm" => raw_hour % 12 + 12,
      | _ => return None
    }
  } else {
    // A bare number is a clock time only with a colon.
    captures.name("minute")?;
    if raw_hour > 23 {
      return None;
    }
    raw_hour
  };

  Some((hour, minute))
}

#[cfg(test)]
mod tests {
  use chrono::{
    NaiveDate,
    NaiveDateTime
  };

  use super::{
    end_of_day,
    format_local_timestamp,
    minutes_of_day,
    parse_date_expr,
    parse_day_expr,
    parse_end_expr
  };

  fn at(
    y: i32,
    m: u32,
    d: u32,
    h: u32,
    min: u32
  ) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
      .and_then(|day| {
        day.and_hms_opt(h, min, 0)
      })
      .expect("valid timestamp")
  }

  #[test]
  fn parses_clock_time_as_next_occurrence()
  {
    let now = at(2026, 2, 17, 23, 0);
    let parsed =
      parse_date_expr("3:23pm", now)
        .expect("parse clock time");
    assert_eq!(
      parsed,
      at(2026, 2, 18, 15, 23)
    );

    let later_today =
      parse_date_expr("23:30", now)
        .expect("parse 24h clock");
    assert_eq!(
      later_today,
      at(2026, 2, 17, 23, 30)
    );
  }

  #[test]
  fn parses_day_with_clock() {
    let now = at(2026, 2, 17, 12, 0);
    let parsed = parse_date_expr(
      "tomorrow 9am",
      now
    )
    .expect("parse day + clock");
    assert_eq!(
      parsed,
      at(2026, 2, 18, 9, 0)
    );
  }

  #[test]
  fn parses_weekday_name() {
    let today =
      NaiveDate::from_ymd_opt(
        2026, 2, 17
      )
      .expect("valid date");
    let parsed =
      parse_day_expr("wednesday", today)
        .expect("parse weekday");
    assert_eq!(
      parsed.to_string(),
      "2026-02-18"
    );
  }

  #[test]
  fn parses_relative_offsets() {
    let now = at(2026, 2, 17, 12, 0);
    assert_eq!(
      parse_date_expr("+90m", now)
        .expect("parse +90m"),
      at(2026, 2, 17, 13, 30)
    );
    assert_eq!(
      parse_date_expr("-1d", now)
        .expect("parse -1d"),
      at(2026, 2, 16, 12, 0)
    );
  }

  #[test]
  fn parses_stored_timestamp_forms() {
    let now = at(2026, 2, 17, 12, 0);
    assert_eq!(
      parse_date_expr(
        "2024-01-05T09:00",
        now
      )
      .expect("short form"),
      at(2024, 1, 5, 9, 0)
    );
    assert_eq!(
      parse_date_expr(
        "2024-01-05 09:30",
        now
      )
      .expect("space form"),
      at(2024, 1, 5, 9, 30)
    );
  }

  #[test]
  fn oversized_relative_offsets_are_errors()
  {
    let now = at(2026, 2, 17, 12, 0);
    for expr in [
      "+999999999d",
      "+9999999999999h",
      "-99999999999999999m",
      "+99999999999999999999d"
    ] {
      assert!(
        parse_date_expr(expr, now)
          .is_err(),
        "{expr} should be rejected"
      );
    }
  }

  #[test]
  fn end_clock_time_may_equal_start() {
    let start = at(2026, 2, 17, 9, 0);
    assert_eq!(
      parse_end_expr("9:00", start)
        .expect("same instant"),
      start
    );
    assert_eq!(
      parse_end_expr("9:30", start)
        .expect("later same day"),
      at(2026, 2, 17, 9, 30)
    );
    assert_eq!(
      parse_end_expr("8:00", start)
        .expect("wraps to next day"),
      at(2026, 2, 18, 8, 0)
    );
    assert_eq!(
      parse_date_expr("9:00", start)
        .expect("start stays strict"),
      at(2026, 2, 18, 9, 0)
    );
  }

  #[test]
  fn rejects_garbage() {
    let now = at(2026, 2, 17, 12, 0);
    assert!(
      parse_date_expr("someday", now)
        .is_err()
    );
  }

  #[test]
  fn short_format_only_for_whole_minutes()
  {
    let whole = at(2024, 1, 5, 9, 0);
    assert_eq!(
      format_local_timestamp(whole),
      "2024-01-05T09:00"
    );
    let with_seconds = whole
      + chrono::Duration::seconds(42);
    assert_eq!(
      format_local_timestamp(
        with_seconds
      ),
      "2024-01-05T09:00:42"
    );
  }

  #[test]
  fn end_of_day_is_last_minute() {
    let day =
      NaiveDate::from_ymd_opt(
        2024, 1, 5
      )
      .expect("valid date");
    assert_eq!(
      minutes_of_day(end_of_day(day)),
      1439
    );
  }
}

pub mod local_timestamp_serde {
  use chrono::NaiveDateTime;
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  pub fn serialize<S>(
    dt: &NaiveDateTime,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serializer.serialize_str(
      &super::format_local_timestamp(
        *dt
      )
    )
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<NaiveDateTime, D::Error>
  where
    D: Deserializer<'de>
  {
    let raw = String::deserialize(
      deserializer
    )?;
    super::parse_local_timestamp(&raw)
      .ok_or_else(|| {
        serde::de::Error::custom(
          format!(
            "invalid timestamp: {raw}"
          )
        )
      })
  }

  pub mod option {
    use chrono::NaiveDateTime;
    use serde::{
      Deserialize,
      Deserializer,
      Serializer
    };

    pub fn serialize<S>(
      dt: &Option<NaiveDateTime>,
      serializer: S
    ) -> Result<S::Ok, S::Error>
    where
      S: Serializer
    {
      match dt {
        | Some(value) => {
          super::serialize(
            value, serializer
          )
        }
        | None => {
          serializer.serialize_none()
        }
      }
    }

    pub fn deserialize<'de, D>(
      deserializer: D
    ) -> Result<
      Option<NaiveDateTime>,
      D::Error
    >
    where
      D: Deserializer<'de>
    {
      let opt =
        Option::<String>::deserialize(
          deserializer
        )?;
      match opt {
        | Some(raw)
          if raw.trim().is_empty() =>
        {
          Ok(None)
        }
        | Some(raw) => {
          super::super::parse_local_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| {
              serde::de::Error::custom(
                format!(
                  "invalid timestamp: \
                   {raw}"
                )
              )
            })
        }
        | None => Ok(None)
      }
    }
  }
}
