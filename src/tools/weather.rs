//! Weather 工具：Open-Meteo 天气预报（无需凭证）
//!
//! 返回当前温度 / 湿度与未来 3 小时的温度、风速、降水。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::tools::{PublicTool, ToolError};

const FORECAST_HOURS: usize = 3;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WeatherArgs {
    /// 纬度，如 12.97
    pub latitude: f64,
    /// 经度，如 77.59
    pub longitude: f64,
}

pub struct WeatherTool {
    client: Client,
    base_url: String,
}

impl WeatherTool {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ToolError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ForecastResponse {
    pub latitude: f64,
    pub longitude: f64,
    pub current: CurrentWeather,
    pub hourly: HourlyWeather,
}

#[derive(Debug, Deserialize)]
pub struct CurrentWeather {
    #[serde(default)]
    pub time: String,
    pub temperature_2m: f64,
    pub relative_humidity_2m: f64,
}

#[derive(Debug, Deserialize)]
pub struct HourlyWeather {
    #[serde(default)]
    pub time: Vec<String>,
    #[serde(default)]
    pub temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    pub precipitation: Vec<Option<f64>>,
    #[serde(default)]
    pub wind_speed_10m: Vec<Option<f64>>,
}

fn one_decimal(v: Option<&Option<f64>>) -> String {
    match v.copied().flatten() {
        Some(x) => format!("{:.1}", x),
        None => "n/a".to_string(),
    }
}

pub fn format_forecast(f: &ForecastResponse) -> String {
    let hours: Vec<String> = (0..FORECAST_HOURS.min(f.hourly.temperature_2m.len()))
        .map(|i| {
            format!(
                "- {} | Temp: {} C | Wind: {} km/h | Rain: {} mm",
                f.hourly.time.get(i).map(String::as_str).unwrap_or("?"),
                one_decimal(f.hourly.temperature_2m.get(i)),
                one_decimal(f.hourly.wind_speed_10m.get(i)),
                one_decimal(f.hourly.precipitation.get(i)),
            )
        })
        .collect();

    format!(
        "Weather for {:.2}, {:.2} (at {})\nCurrent Temperature: {:.1} C\nHumidity: {:.1}%\nNext {} hours:\n{}",
        f.latitude,
        f.longitude,
        f.current.time,
        f.current.temperature_2m,
        f.current.relative_humidity_2m,
        hours.len(),
        hours.join("\n")
    )
}

#[async_trait]
impl PublicTool for WeatherTool {
    type Args = WeatherArgs;

    fn name(&self) -> &str {
        "get_weather_forecast"
    }

    fn description(&self) -> &str {
        "Get the current temperature and humidity plus a 3-hour forecast (temperature, wind, rain) for a latitude/longitude. Useful for explaining solar output."
    }

    async fn execute(&self, args: WeatherArgs) -> Result<String, ToolError> {
        if !(-90.0..=90.0).contains(&args.latitude) || !(-180.0..=180.0).contains(&args.longitude)
        {
            return Err(ToolError::invalid(
                self.name(),
                "latitude must be within [-90, 90] and longitude within [-180, 180]",
            ));
        }

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("latitude", args.latitude.to_string()),
                ("longitude", args.longitude.to_string()),
                (
                    "hourly",
                    "temperature_2m,precipitation,wind_speed_10m".to_string(),
                ),
                ("current", "temperature_2m,relative_humidity_2m".to_string()),
                ("forecast_hours", FORECAST_HOURS.to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ToolError::Upstream {
                service: "Open-Meteo".to_string(),
                message: format!("HTTP {}", response.status()),
            });
        }

        let forecast: ForecastResponse = response
            .json()
            .await
            .map_err(|e| ToolError::Malformed(e.to_string()))?;
        Ok(format_forecast(&forecast))
    }
}
