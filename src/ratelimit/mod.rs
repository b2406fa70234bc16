pub mod resource;
mod store;

pub use resource::{
    build_resource_id, get_app, get_ip, get_node, get_path, get_service, ResourceKey,
    APP_DEFAULT_RESOURCE, NODE_RESOURCE, SERVICE_DEFAULT_RESOURCE,
};
pub use store::{ResourceRateLimitConfig, ResourceRateLimitStore};
