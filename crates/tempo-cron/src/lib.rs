//! `tempo-cron` - Quartz-style cron expressions and next-fire-time search.
//!
//! # Format
//!
//! Six or seven whitespace-separated fields:
//!
//! | Position | Field        | Values                      | Extra |
//! |----------|--------------|-----------------------------|-------|
//! | 1        | seconds      | 0-59                        |       |
//! | 2        | minutes      | 0-59                        |       |
//! | 3        | hours        | 0-23                        |       |
//! | 4        | day-of-month | 1-31                        | `?`   |
//! | 5        | month        | 1-12 or `JAN`-`DEC`         |       |
//! | 6        | day-of-week  | 1-7 or `SUN`-`SAT` (1 = Sun) | `?`   |
//! | 7        | year         | 1970-2099 (optional)        |       |
//!
//! Each field accepts `*`, lists (`1,5,9`), ranges (`9-17`) and steps
//! (`*/15`, `0/5`, `10-40/10`). When both day-of-month and day-of-week are
//! restricted a day matches if *either* matches, as in classic cron.
//!
//! Quartz's day modifiers are not supported: `L` (last day), `W` (nearest
//! weekday) and `#` (nth weekday, e.g. `6#3`) are rejected with a
//! [`CronError::Syntax`] naming them.
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use tempo_cron::CronExpression;
//!
//! let every_five: CronExpression = "0 0/5 * * * ?".parse().unwrap();
//! let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 3, 0).unwrap();
//! assert_eq!(
//!     every_five.next_after(at),
//!     Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 5, 0).unwrap())
//! );
//! ```

pub mod error;
pub mod expression;
pub mod field;

pub use error::{CronError, Result};
pub use expression::{CronExpression, DEFAULT_LOOKAHEAD_YEARS};
pub use field::{FieldKind, FieldSet};
