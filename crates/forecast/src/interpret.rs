//! Rule-based plain-language descriptions of a day's readings.
//!
//! The text feeds retrieval queries and prompts, so only the thresholds
//! matter; wording is free to change.

use crate::reading::{ClimateDetails, PeriodReading, UvDetails, WeatherDetails};

pub fn interpret_weather(w: &WeatherDetails) -> String {
    let mut out = vec![format!(
        "Air temperature is {:.1}°C and it feels like {:.1}°C.",
        w.temp, w.feels_like
    )];

    let feels = w.feels_like;
    if (20.0..=28.0).contains(&feels) {
        out.push("It feels pleasant, good for outdoor activity.".into());
    } else if feels > 35.0 {
        out.push("It feels very hot; watch for heatstroke.".into());
    } else if feels > 28.0 {
        out.push("It feels hot.".into());
    } else if feels < 15.0 {
        out.push("It feels cold; dress warmly.".into());
    }

    let humidity = w.humidity;
    if (40.0..=70.0).contains(&humidity) {
        out.push(format!("Humidity is comfortable at {humidity:.0}%."));
    } else if humidity > 80.0 {
        out.push(format!("Humidity is high at {humidity:.0}%, the air is muggy."));
    } else if humidity < 40.0 {
        out.push(format!("Humidity is low at {humidity:.0}%, the air is dry."));
    }

    out.push(format!("Wind speed is {:.1} m/s.", w.wind_speed));
    if w.wind_gust > 15.0 {
        out.push(format!("Gusts reach {:.1} m/s.", w.wind_gust));
    } else if w.wind_speed > 10.0 {
        out.push("The wind is strong.".into());
    } else {
        out.push("The wind is light.".into());
    }

    let rain_pct = (w.pop * 100.0) as i64;
    if w.pop > 0.7 {
        out.push(format!("Rain is very likely ({rain_pct}%)."));
    } else if w.pop > 0.4 {
        out.push(format!("Rain is possible ({rain_pct}%)."));
    } else {
        out.push(format!("Rain is unlikely ({rain_pct}%)."));
    }

    if w.visibility >= 10_000.0 {
        out.push("Visibility is excellent.".into());
    } else if w.visibility < 5_000.0 {
        out.push(format!("Visibility is reduced to about {:.0} m.", w.visibility));
    }

    if w.clouds_all == 0.0 {
        out.push("The sky is clear.".into());
    } else if w.clouds_all > 75.0 {
        out.push(format!("The sky is overcast ({:.0}%).", w.clouds_all));
    } else {
        out.push(format!("Cloud cover is moderate ({:.0}%).", w.clouds_all));
    }

    out.push(format!(
        "Conditions: '{}' ({}).",
        w.weather_main, w.weather_description
    ));
    out.join(" ")
}

fn band(value: f64, bounds: &[f64], labels: &[&'static str]) -> &'static str {
    bounds
        .iter()
        .position(|&b| value < b)
        .map_or(labels[labels.len() - 1], |i| labels[i])
}

pub fn interpret_air_quality(c: &ClimateDetails) -> String {
    let mut out = Vec::new();

    let aqi_label = match c.aqi {
        1 => Some("Good"),
        2 => Some("Fair"),
        3 => Some("Moderate"),
        4 => Some("Poor"),
        5 => Some("Very Poor"),
        _ => None,
    };
    if let Some(label) = aqi_label {
        out.push(format!("Air Quality Index is {label} ({}).", c.aqi));
    }

    const FIVE: [&str; 5] = ["good", "fair", "moderate", "poor", "very poor"];
    out.push(format!(
        "PM2.5 is {} at {:.1} μg/m3.",
        band(c.pm2_5, &[10.0, 25.0, 50.0, 75.0], &FIVE),
        c.pm2_5
    ));
    out.push(format!(
        "PM10 is {} at {:.1} μg/m3.",
        band(c.pm10, &[20.0, 50.0, 100.0, 200.0], &FIVE),
        c.pm10
    ));
    out.push(format!(
        "Ozone is {} at {:.1} μg/m3.",
        band(c.o3, &[60.0, 100.0, 140.0, 180.0], &FIVE),
        c.o3
    ));
    out.push(format!(
        "CO is {} at {:.1} μg/m3.",
        band(c.co, &[4_400.0, 9_400.0], &["good", "fair", "high"]),
        c.co
    ));
    out.push(format!(
        "NO2 is {} at {:.1} μg/m3.",
        band(c.no2, &[40.0, 70.0], &["good", "fair", "moderate"]),
        c.no2
    ));
    out.push(format!(
        "SO2 is {} at {:.1} μg/m3.",
        band(c.so2, &[20.0, 80.0], &["good", "fair", "high"]),
        c.so2
    ));
    out.push(format!(
        "NH3 is {} at {:.1} μg/m3.",
        band(c.nh3, &[20.0], &["good", "elevated"]),
        c.nh3
    ));

    out.join(" ")
}

pub fn interpret_uv(uv: &UvDetails) -> String {
    let advice = match uv.uvi {
        u if u < 3.0 => "Low; no protection needed",
        u if u < 6.0 => "Moderate; protect skin during long exposure",
        u if u < 8.0 => "High; cover up and use sunscreen",
        u if u < 11.0 => "Very High; limit time outdoors around noon",
        _ => "Extreme; avoid direct sunlight",
    };
    format!("UV index {:.1} is {advice}.", uv.uvi)
}

/// One paragraph per period, in the order given.
pub fn interpret_day(readings: &[PeriodReading]) -> Vec<String> {
    readings
        .iter()
        .map(|r| {
            format!(
                "During the {}, the weather: {} The air quality: {} The UV radiation: {}",
                r.period,
                interpret_weather(&r.weather_details),
                interpret_air_quality(&r.climate_details),
                interpret_uv(&r.uvi_details)
            )
        })
        .collect()
}
