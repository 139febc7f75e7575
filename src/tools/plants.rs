//! 电站工具（需要 iSolarCloud 凭证）
//!
//! - list_solar_plants: 电站列表（名称、ID、在线状态、位置、安装日期）
//! - solar_plants_basic_info: 电站基础信息（装机容量 kW、上网电价等）
//! - get_plant_details: 单个电站实时数据（当前功率、今日 / 累计发电量）

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::tools::isolarcloud::{
    field_f64, field_text, online_label, IsolarCloudApi, GET_POWER_STATION_DETAIL,
    QUERY_POWER_STATION_LIST, QUERY_PS_DETAIL,
};
use crate::tools::{AuthenticatedTool, ToolError};

const PS_TYPES: &str = "1,3,4,5";
const VALID_FLAGS: &str = "1,3";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListPlantsArgs {
    /// 页码，从 1 开始
    #[serde(default)]
    pub page: Option<u32>,
    /// 每页条数（默认 10）
    #[serde(default)]
    pub size: Option<u32>,
    /// 按电站名称过滤
    #[serde(default)]
    pub ps_name: Option<String>,
}

pub struct ListSolarPlantsTool {
    api: IsolarCloudApi,
}

impl ListSolarPlantsTool {
    pub fn new(api: IsolarCloudApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl AuthenticatedTool for ListSolarPlantsTool {
    type Args = ListPlantsArgs;

    fn name(&self) -> &str {
        "list_solar_plants"
    }

    fn description(&self) -> &str {
        "List the user's solar power plants with name, plant ID (ps_id), online status, location and installation date. Call this first to discover plant IDs."
    }

    async fn execute(&self, args: ListPlantsArgs, access_token: &str) -> Result<String, ToolError> {
        let mut payload = Map::new();
        payload.insert("page".into(), Value::from(args.page.unwrap_or(1).max(1)));
        payload.insert("size".into(), Value::from(args.size.unwrap_or(10).clamp(1, 100)));
        payload.insert("ps_type".into(), Value::from(PS_TYPES));
        payload.insert("valid_flag".into(), Value::from(VALID_FLAGS));
        if let Some(name) = args.ps_name.filter(|n| !n.trim().is_empty()) {
            payload.insert("ps_name".into(), Value::from(name));
        }

        let data = self
            .api
            .call(QUERY_POWER_STATION_LIST, access_token, payload)
            .await?;
        format_plant_list(&data)
    }
}

pub fn format_plant_list(data: &Value) -> Result<String, ToolError> {
    let plants = data
        .get("pageList")
        .and_then(Value::as_array)
        .ok_or_else(|| ToolError::Malformed("result_data.pageList missing".to_string()))?;

    let mut lines = vec![format!("Found {} solar plants:", plants.len())];
    for p in plants {
        lines.push(format!(
            "- {} (ID: {})\n  Status: {}\n  Location: {}\n  Installed: {}",
            field_text(p, "ps_name").unwrap_or_else(|| "Unknown Name".into()),
            field_text(p, "ps_id").unwrap_or_else(|| "N/A".into()),
            online_label(p),
            field_text(p, "ps_location").unwrap_or_else(|| "Unknown Location".into()),
            field_text(p, "install_date").unwrap_or_else(|| "N/A".into()),
        ));
    }
    Ok(lines.join("\n"))
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BasicInfoArgs {
    /// 逗号分隔的数字电站 ID（来自 list_solar_plants），如 "1711005,1688245"
    #[serde(deserialize_with = "plant_id_list")]
    #[schemars(with = "String")]
    pub ps_ids: String,
}

/// 校验并规范化逗号分隔的数字 ID 列表
pub fn normalize_ps_ids(raw: &str) -> Result<String, String> {
    let ids: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if ids.is_empty() {
        return Err("ps_ids must contain at least one plant id".to_string());
    }
    if let Some(bad) = ids.iter().find(|id| !id.chars().all(|c| c.is_ascii_digit())) {
        return Err(format!("'{}' is not a numeric plant id", bad));
    }
    Ok(ids.join(","))
}

/// 解析参数时即完成 ID 校验，非法 ID 不会走到取 token 那一步
fn plant_id_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let raw = String::deserialize(deserializer)?;
    normalize_ps_ids(&raw).map_err(serde::de::Error::custom)
}

fn single_plant_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let id = plant_id_list(deserializer)?;
    if id.contains(',') {
        return Err(serde::de::Error::custom("expected a single plant id"));
    }
    Ok(id)
}

pub struct SolarPlantsBasicInfoTool {
    api: IsolarCloudApi,
}

impl SolarPlantsBasicInfoTool {
    pub fn new(api: IsolarCloudApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl AuthenticatedTool for SolarPlantsBasicInfoTool {
    type Args = BasicInfoArgs;

    fn name(&self) -> &str {
        "solar_plants_basic_info"
    }

    fn description(&self) -> &str {
        "Fetch basic information (installed capacity in kW, status, location, installation date, feed-in tariff) for one or more plants by comma-separated numeric plant IDs."
    }

    async fn execute(&self, args: BasicInfoArgs, access_token: &str) -> Result<String, ToolError> {
        let mut payload = Map::new();
        payload.insert("ps_ids".into(), Value::from(args.ps_ids));
        let data = self
            .api
            .call(GET_POWER_STATION_DETAIL, access_token, payload)
            .await?;
        format_basic_info(&data)
    }
}

pub fn format_basic_info(data: &Value) -> Result<String, ToolError> {
    let plants = data
        .get("data_list")
        .and_then(Value::as_array)
        .ok_or_else(|| ToolError::Malformed("result_data.data_list missing".to_string()))?;

    let mut lines = vec![format!("Found {} solar plants:", plants.len())];
    for p in plants {
        let capacity = field_f64(p, "install_power")
            .filter(|w| *w > 0.0)
            .map(|w| format!("{:.2} kW", w / 1000.0))
            .unwrap_or_else(|| "Unknown".into());
        let tariff = match (
            field_text(p, "ps_feedin_power_price_wh"),
            field_text(p, "power_price_unit"),
        ) {
            (Some(price), Some(unit)) => format!("{} {}", price, unit),
            _ => "Price data not available".into(),
        };
        lines.push(format!(
            "DETAILS FOR PLANT: {}\n- Plant ID: {}\n- Current Status: {}\n- Installed Capacity: {}\n- Location: {}\n- Installation Date: {}\n- Feed-in Tariff: {}\n---",
            field_text(p, "ps_name").unwrap_or_else(|| "Unnamed Plant".into()),
            field_text(p, "ps_id").unwrap_or_else(|| "N/A".into()),
            online_label(p),
            capacity,
            field_text(p, "ps_location").unwrap_or_else(|| "Location not specified".into()),
            field_text(p, "install_date").unwrap_or_else(|| "Date not provided".into()),
            tariff,
        ));
    }
    Ok(lines.join("\n"))
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PlantDetailsArgs {
    /// 电站 ID，如 "1711005"
    #[serde(deserialize_with = "single_plant_id")]
    #[schemars(with = "String")]
    pub ps_id: String,
}

pub struct PlantDetailsTool {
    api: IsolarCloudApi,
}

impl PlantDetailsTool {
    pub fn new(api: IsolarCloudApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl AuthenticatedTool for PlantDetailsTool {
    type Args = PlantDetailsArgs;

    fn name(&self) -> &str {
        "get_plant_details"
    }

    fn description(&self) -> &str {
        "Fetch real-time data for a specific plant by its ID: current output (kW), today's yield (kWh), total yield (kWh) and location."
    }

    async fn execute(&self, args: PlantDetailsArgs, access_token: &str) -> Result<String, ToolError> {
        let mut payload = Map::new();
        payload.insert("ps_id".into(), Value::from(args.ps_id));
        let data = self.api.call(QUERY_PS_DETAIL, access_token, payload).await?;
        Ok(format_plant_details(&data))
    }
}

pub fn format_plant_details(data: &Value) -> String {
    let number = |key: &str| field_text(data, key).unwrap_or_else(|| "0".into());
    format!(
        "Plant Status Report: {}\n- Current Output: {} kW\n- Yield Today: {} kWh\n- Total Yield: {} kWh\n- Location: {}",
        field_text(data, "ps_name").unwrap_or_else(|| "Unknown".into()),
        number("curr_power"),
        number("day_energy"),
        number("total_energy"),
        field_text(data, "ps_location").unwrap_or_else(|| "N/A".into()),
    )
}
