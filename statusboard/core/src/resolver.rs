//! Status Resolver
//!
//! Pure functions that merge the source statuses into one [`CombinedStatus`]
//! using the ordered rule list from the [`ConditionStore`].
//!
//! # Resolution
//!
//! 1. Find the first rule (file order) whose four match fields all match.
//!    No match means the previous status is returned unchanged.
//! 2. Fill the rule's text template with the work/home status texts.
//! 3. Keep the previous start time if the text did not change.
//! 4. Pick the expiration: the home account's when the rule selected on a
//!    set home emoji, the work account's otherwise.
//! 5. Render the time range.
//!
//! [`ConditionStore`]: crate::conditions::ConditionStore

use std::fmt::Display;

use chrono::{DateTime, Local, TimeZone};

use crate::conditions::StatusCondition;
use crate::status::{CombinedStatus, HomeStatus, SourceStatus};

/// Placeholder replaced with the work account's status text
pub const WORK_STATUS_TEXT: &str = "(WORK_STATUS_TEXT)";

/// Placeholder replaced with the home account's status text
pub const HOME_STATUS_TEXT: &str = "(HOME_STATUS_TEXT)";

/// Wildcard matching any non-empty value
pub const WILDCARD: &str = "*";

const CLOCK_FORMAT: &str = "%-I:%M %p";
const DATED_CLOCK_FORMAT: &str = "%a %b %-d %-I:%M %p";

/// Match one condition field against an actual value
///
/// - `None` or `""` matches anything, including an empty value
/// - `*` matches any non-empty value
/// - anything else must be equal
#[must_use]
pub fn matches(condition: Option<&str>, actual: &str) -> bool {
    match condition {
        None | Some("") => true,
        Some(WILDCARD) => !actual.is_empty(),
        Some(expected) => expected == actual,
    }
}

/// Whether all four match fields of `condition` match
#[must_use]
pub fn condition_matches(
    condition: &StatusCondition,
    work: &SourceStatus,
    home: &SourceStatus,
) -> bool {
    matches(condition.work_emoji.as_deref(), &work.emoji)
        && matches(condition.work_presence.as_deref(), &work.presence)
        && matches(condition.home_emoji.as_deref(), &home.emoji)
        && matches(condition.home_presence.as_deref(), &home.presence)
}

/// First rule in file order that matches, if any
#[must_use]
pub fn find_match<'a>(
    conditions: &'a [StatusCondition],
    work: &SourceStatus,
    home: &SourceStatus,
) -> Option<&'a StatusCondition> {
    conditions
        .iter()
        .find(|condition| condition_matches(condition, work, home))
}

/// Whether the matched rule selected on the home emoji
///
/// Stricter than [`matches`]: an empty rule field matches anything but
/// does not select the home status.
fn home_emoji_selected(condition: &StatusCondition, home: &SourceStatus) -> bool {
    if home.emoji.is_empty() {
        return false;
    }
    match condition.home_emoji.as_deref() {
        None | Some("") => false,
        Some(WILDCARD) => true,
        Some(expected) => expected == home.emoji,
    }
}

/// Expiration to display for a matched rule
#[must_use]
pub fn chosen_expiration(
    condition: &StatusCondition,
    work: &SourceStatus,
    home: &SourceStatus,
) -> i64 {
    if home_emoji_selected(condition, home) {
        home.expiration
    } else {
        work.expiration
    }
}

/// Fill a display template with the source texts
#[must_use]
pub fn fill_template(template: &str, work: &SourceStatus, home: &SourceStatus) -> String {
    template
        .replace(WORK_STATUS_TEXT, &work.text)
        .replace(HOME_STATUS_TEXT, &home.text)
}

/// Render a wall-clock time (`9:05 AM`)
#[must_use]
pub fn format_clock<Tz>(time: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    time.format(CLOCK_FORMAT).to_string()
}

/// Render an expiration epoch relative to `now`
///
/// Same-day expirations show only the time; anything else carries the date.
#[must_use]
pub fn format_expiration<Tz>(expiration: i64, now: &DateTime<Tz>) -> Option<String>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let end = now.timezone().timestamp_opt(expiration, 0).single()?;
    if end.date_naive() == now.date_naive() {
        Some(end.format(CLOCK_FORMAT).to_string())
    } else {
        Some(end.format(DATED_CLOCK_FORMAT).to_string())
    }
}

/// Render the `times` display string
#[must_use]
pub fn render_times<Tz>(start: &str, expiration: i64, now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    if expiration == 0 {
        return format!("Started @ {start}");
    }
    match format_expiration(expiration, now) {
        Some(end) => format!("{start} - {end}"),
        None => format!("Started @ {start}"),
    }
}

/// Resolve the combined status using the local clock
#[must_use]
pub fn resolve(
    old: &CombinedStatus,
    work: &SourceStatus,
    home: &SourceStatus,
    house: &HomeStatus,
    conditions: &[StatusCondition],
) -> CombinedStatus {
    resolve_at(old, work, home, house, conditions, &Local::now())
}

/// Resolve the combined status as of `now`
#[must_use]
pub fn resolve_at<Tz>(
    old: &CombinedStatus,
    work: &SourceStatus,
    home: &SourceStatus,
    house: &HomeStatus,
    conditions: &[StatusCondition],
    now: &DateTime<Tz>,
) -> CombinedStatus
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let Some(condition) = find_match(conditions, work, home) else {
        tracing::debug!("No rule matched, keeping current status");
        return old.clone();
    };

    let text = fill_template(&condition.display_text, work, home);
    let status_start_time = if text == old.text {
        old.status_start_time.clone()
    } else {
        format_clock(now)
    };
    let expiration = chosen_expiration(condition, work, home);
    let times = render_times(&status_start_time, expiration, now);

    CombinedStatus {
        emoji: condition.display_emoji.clone(),
        text,
        times,
        status_start_time,
        expiration,
        home: house.clone(),
        last_updated_at: old.last_updated_at,
    }
}

/// Re-apply start-time stickiness after a post-processing step
///
/// Hooks run after [`resolve`] and may rewrite `text`, so the start time is
/// decided again against the final text.
#[must_use]
pub fn reconcile_start_time<Tz>(
    old: &CombinedStatus,
    mut new: CombinedStatus,
    now: &DateTime<Tz>,
) -> CombinedStatus
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let start = if new.text == old.text {
        old.status_start_time.clone()
    } else {
        format_clock(now)
    };
    if start != new.status_start_time {
        new.status_start_time = start;
        new.times = render_times(&new.status_start_time, new.expiration, now);
    }
    new
}
