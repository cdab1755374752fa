use std::{
    path::PathBuf,
    sync::Arc,
    thread::{self, JoinHandle},
};

use anyhow::Context;
use crossbeam_channel::{Receiver, Sender};
use crossbeam_utils::sync::WaitGroup;

use crate::{
    asset_source::AssetSource,
    handle::{AssetImageHandle, AssetMeshHandle},
    image::ImagePixels,
    mesh::MeshGeometry,
};

pub enum LoadRequest {
    Mesh {
        handle: AssetMeshHandle,
        path: PathBuf,
    },
    Image {
        handle: AssetImageHandle,
        path: PathBuf,
        mip_count: u32,
    },
}

/// 后台任务的结果，由主线程在 tick 开始时统一取回
pub enum LoadResult {
    Mesh {
        handle: AssetMeshHandle,
        geometry: anyhow::Result<MeshGeometry>,
    },
    Image {
        handle: AssetImageHandle,
        pixels: anyhow::Result<ImagePixels>,
    },
}

enum Dispatch {
    /// - 内部的 `dispatch-thread` 负责调度：接收加载请求，分发任务到 worker
    /// - rayon 提供 worker 线程池
    Threaded {
        request_sender: Option<Sender<LoadRequest>>,
        dispatch_thread: Option<JoinHandle<()>>,
    },
    /// 在调用线程上立即执行，结果同样通过 channel 返回
    Inline {
        source: Arc<dyn AssetSource>,
        result_sender: Sender<LoadResult>,
    },
}

/// 负责管理后台 IO 任务
///
/// 后台任务只负责读取和解码，不会修改资源状态；
/// 结果通过 crossbeam channel 交还给主线程。
pub struct AssetLoader {
    dispatch: Dispatch,
    /// 用于从 worker 接收加载结果
    result_receiver: Receiver<LoadResult>,
}

// new & init
impl AssetLoader {
    /// `worker_threads` 为 0 时使用 rayon 的默认线程数
    pub fn new(source: Arc<dyn AssetSource>, worker_threads: usize) -> anyhow::Result<Self> {
        let (req_tx, req_rx) = crossbeam_channel::unbounded::<LoadRequest>();
        let (res_tx, res_rx) = crossbeam_channel::unbounded::<LoadResult>();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_threads)
            .thread_name(|index| format!("Asset-Loader-{}", index))
            .build()
            .context("创建资源加载线程池失败")?;

        let dispatch_thread = thread::Builder::new()
            .name("AssetDispatchThread".to_string())
            .spawn(move || {
                let wait_group = WaitGroup::new();

                while let Ok(req) = req_rx.recv() {
                    let _span = truvis_crate_tools::profile_span!("AssetLoader::dispatch");

                    let res_tx = res_tx.clone();
                    let source = source.clone();
                    // 任务结束时闭包销毁，wg_task 随之 drop
                    let wg_task = wait_group.clone();

                    pool.spawn(move || {
                        let result = run_load_task(source.as_ref(), req);
                        let _ = res_tx.send(result);
                        drop(wg_task);
                    });
                }

                wait_group.wait();
            })
            .context("创建资源调度线程失败")?;

        Ok(Self {
            dispatch: Dispatch::Threaded {
                request_sender: Some(req_tx),
                dispatch_thread: Some(dispatch_thread),
            },
            result_receiver: res_rx,
        })
    }

    /// 不创建线程，`request_load` 时直接执行任务
    pub fn inline(source: Arc<dyn AssetSource>) -> Self {
        let (res_tx, res_rx) = crossbeam_channel::unbounded::<LoadResult>();
        Self {
            dispatch: Dispatch::Inline {
                source,
                result_sender: res_tx,
            },
            result_receiver: res_rx,
        }
    }
}

// tools
impl AssetLoader {
    pub fn request_load(&self, req: LoadRequest) {
        match &self.dispatch {
            Dispatch::Threaded { request_sender, .. } => {
                if let Some(sender) = request_sender
                    && let Err(e) = sender.send(req)
                {
                    log::error!("Failed to send asset load request: {}", e);
                }
            }
            Dispatch::Inline { source, result_sender } => {
                let _ = result_sender.send(run_load_task(source.as_ref(), req));
            }
        }
    }

    pub fn try_recv_result(&self) -> Option<LoadResult> {
        self.result_receiver.try_recv().ok()
    }

    /// 阻塞等待下一个结果，主要用于测试
    pub fn recv_result_timeout(&self, timeout: std::time::Duration) -> Option<LoadResult> {
        self.result_receiver.recv_timeout(timeout).ok()
    }

    #[inline]
    pub fn is_inline(&self) -> bool {
        matches!(self.dispatch, Dispatch::Inline { .. })
    }
}

impl Drop for AssetLoader {
    fn drop(&mut self) {
        let Dispatch::Threaded {
            request_sender,
            dispatch_thread,
        } = &mut self.dispatch
        else {
            return;
        };

        // 必须先 drop sender，否则 recv 会一直阻塞，导致 join 死锁
        *request_sender = None;

        log::info!("AssetLoader is being dropped, waiting for tasks to complete...");
        if let Some(thread) = dispatch_thread.take()
            && thread.join().is_err()
        {
            log::error!("Failed to join asset dispatch thread");
        }
        log::info!("All asset tasks completed, AssetLoader dropped.");
    }
}

/// 实际的加载任务：文件读取 -> 解码
fn run_load_task(source: &dyn AssetSource, req: LoadRequest) -> LoadResult {
    match req {
        LoadRequest::Mesh { handle, path } => {
            let _span = truvis_crate_tools::profile_span!("AssetLoader::load_mesh");
            log::debug!("Loading mesh: {:?}", path);
            LoadResult::Mesh {
                handle,
                geometry: source.load_mesh(&path),
            }
        }
        LoadRequest::Image { handle, path, mip_count } => {
            let _span = truvis_crate_tools::profile_span!("AssetLoader::load_image");
            log::debug!("Loading image: {:?}", path);
            LoadResult::Image {
                handle,
                pixels: source.load_image(&path, mip_count),
            }
        }
    }
}
