use chrono::{Local, NaiveDate};

/// Date label used in batch directory names, e.g. `01 February 2024`.
pub fn batch_date_label(date: NaiveDate) -> String {
    date.format("%d %B %Y").to_string()
}

pub fn current_human_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M").to_string()
}
