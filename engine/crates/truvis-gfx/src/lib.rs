//! Truvis 的 GFX 层中与资源传输相关的部分
//!
//! - [`context::GfxTransferContext`]：资源创建、copy 命令录制的抽象，上层的流式加载只依赖这个 trait
//! - [`vulkan_context::VulkanTransferContext`]：基于 ash + vk-mem 的实现
//! - [`headless::HeadlessTransferContext`]：纯内存实现，用于测试与离线工具
//! - [`resources`]：在固定容量 buffer 上做子分配的 `DynamicBuffer`，以及每帧预算有限的 `StagingBuffer`

pub mod commands;
pub mod context;
pub mod headless;
pub mod resources;
pub mod vulkan_context;
