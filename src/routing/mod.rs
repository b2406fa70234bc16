mod api_config;
mod matcher;
mod pattern;
mod route;

pub use api_config::{ApiConfig, ALL_GATEWAY_GROUPS};
pub use matcher::{ApiConfigTable, MatchPrecedence, MatchedRoute, SpecificityFirst};
pub use pattern::{is_ant_path_pattern, PathPattern};
pub use route::{Route, RpcTarget};
