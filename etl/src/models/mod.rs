mod weather;

pub use weather::{DAILY_METRICS, DailySeries, RawWeatherDocument, UnitRow};
