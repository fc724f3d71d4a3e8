//! tracy 性能分析的辅助宏
//!
//! `tracy_client::span!` 要求 Client 已经启动，否则会 panic。
//! 单元测试和命令行工具通常不会启动 Client，因此这里包一层：Client 未运行时不做任何事。

/// 开启一个 tracy span，返回 `Option<tracy_client::Span>`，需要绑定到变量上以延长生命周期
///
/// ```ignore
/// let _span = radiant_crate_tools::profile_span!("UploadStager::flush");
/// ```
#[macro_export]
macro_rules! profile_span {
    ($name:expr) => {
        ::tracy_client::Client::running().map(|client| client.span(::tracy_client::span_location!($name), 0))
    };
}

/// 启动 tracy client，之后的 `profile_span!` 才会产生数据
pub fn start_profiler() {
    let _client = tracy_client::Client::start();
    log::info!("tracy client started");
}
