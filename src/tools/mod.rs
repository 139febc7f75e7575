//! 工具层：注册表、分发器与具体工具
//!
//! - 认证工具：list_solar_plants / solar_plants_basic_info / get_plant_details（iSolarCloud）
//! - 公开工具：get_weather_forecast（Open-Meteo）/ search_web（Tavily）

pub mod executor;
pub mod isolarcloud;
pub mod plants;
pub mod registry;
pub mod schema;
pub mod search;
pub mod weather;

pub use executor::ToolDispatcher;
pub use isolarcloud::IsolarCloudApi;
pub use plants::{ListSolarPlantsTool, PlantDetailsTool, SolarPlantsBasicInfoTool};
pub use registry::{
    AuthenticatedTool, Capability, PublicTool, ToolError, ToolRegistry,
};
pub use schema::ToolSignature;
pub use search::SearchTool;
pub use weather::WeatherTool;
