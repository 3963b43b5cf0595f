// 插件系统模块
// 插件生命周期、依赖检查、沙箱执行和健康状态

pub mod dependency;
pub mod device;
pub mod executor;
pub mod health;
pub mod lifecycle;
pub mod plugin_interface;
pub mod plugin_loader;
pub mod plugin_manager;
pub mod plugin_registry;

#[cfg(test)]
mod testing;
#[cfg(test)]
mod tests;

pub use dependency::*;
pub use device::*;
pub use executor::*;
pub use health::*;
pub use lifecycle::*;
pub use plugin_interface::*;
pub use plugin_loader::*;
pub use plugin_manager::*;
pub use plugin_registry::*;
