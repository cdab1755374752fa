use slotmap::new_key_type;

new_key_type! {
    /// 指向一个 GPU Buffer 资源
    ///
    /// 由 [`GfxTransferContext`](crate::context::GfxTransferContext) 分配，
    /// 通过 slotmap 的代际索引保证失效的 handle 不会指向新的资源。
    pub struct GfxBufferHandle;

    /// 指向一个 GPU Image 资源
    pub struct GfxImageHandle;
}
