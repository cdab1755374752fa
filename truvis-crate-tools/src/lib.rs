//! Truvis 工具集
//!
//! 提供日志初始化、性能分析 span、资源路径管理等通用工具。
//!
//! # TruvisPath
//! 基于工作区根目录的统一路径管理，避免硬编码相对路径。
//!
//! # profile_span!
//! 仅在 tracy client 运行时创建 span，测试与工具中可以放心使用。

pub mod init_log;
pub mod profiling;
pub mod resource;
