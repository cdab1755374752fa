use std::cmp::Ordering;

/// 上传队列中的组合优先级
///
/// 打包为一个 u64，按整数比较即可实现多级排序，数值越大越先上传：
///
/// | bits    | 字段       | 含义                                                   |
/// |---------|------------|--------------------------------------------------------|
/// | 56..64  | `progress` | 上传进度 0 ~ 100，越接近完成越优先                     |
/// | 48..56  | `lod`      | image 的 mip 等级，粗糙的 mip 先上传                   |
/// | 32..48  | `wait`     | 在队列中等待的 tick 数，防止饥饿                       |
/// | 0..32   | `resource` | 资源本身的优先级                                       |
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct UploadPriority {
    pub progress: u8,
    pub lod: u8,
    pub wait: u16,
    pub resource: u32,
}

impl UploadPriority {
    pub const PROGRESS_SHIFT: u32 = 56;
    pub const LOD_SHIFT: u32 = 48;
    pub const WAIT_SHIFT: u32 = 32;

    pub fn new(lod: u8, resource: u32) -> Self {
        Self {
            progress: 0,
            lod,
            wait: 0,
            resource,
        }
    }

    #[inline]
    pub fn packed(self) -> u64 {
        ((self.progress as u64) << Self::PROGRESS_SHIFT)
            | ((self.lod as u64) << Self::LOD_SHIFT)
            | ((self.wait as u64) << Self::WAIT_SHIFT)
            | self.resource as u64
    }

    #[inline]
    pub fn from_packed(packed: u64) -> Self {
        Self {
            progress: (packed >> Self::PROGRESS_SHIFT) as u8,
            lod: (packed >> Self::LOD_SHIFT) as u8,
            wait: (packed >> Self::WAIT_SHIFT) as u16,
            resource: packed as u32,
        }
    }

    /// 去掉与上传过程相关的部分，用于和驻留资源比较
    #[inline]
    pub fn residency(self) -> ResidencyPriority {
        ResidencyPriority {
            lod: self.lod,
            resource: self.resource,
        }
    }
}

impl Ord for UploadPriority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.packed().cmp(&other.packed())
    }
}

impl PartialOrd for UploadPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 已驻留在 GPU 上的资源的优先级，与 [`UploadPriority`] 的组成相同，但没有 progress 和 wait
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ResidencyPriority {
    pub lod: u8,
    pub resource: u32,
}

impl ResidencyPriority {
    #[inline]
    pub fn packed(self) -> u64 {
        UploadPriority {
            progress: 0,
            lod: self.lod,
            wait: 0,
            resource: self.resource,
        }
        .packed()
    }
}

impl Ord for ResidencyPriority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.packed().cmp(&other.packed())
    }
}

impl PartialOrd for ResidencyPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_order_by_significance() {
        let base = UploadPriority {
            progress: 10,
            lod: 0,
            wait: 0,
            resource: u32::MAX,
        };
        // progress 压过其它所有字段
        let more_progress = UploadPriority {
            progress: 11,
            lod: 0,
            wait: 0,
            resource: 0,
        };
        assert!(more_progress > base);

        // lod 压过 wait 和 resource
        let coarser = UploadPriority {
            lod: 3,
            ..UploadPriority::new(0, 0)
        };
        let waited = UploadPriority {
            lod: 2,
            wait: u16::MAX,
            resource: u32::MAX,
            ..Default::default()
        };
        assert!(coarser > waited);

        // wait 压过 resource
        let old = UploadPriority {
            wait: 1,
            ..Default::default()
        };
        let important = UploadPriority {
            resource: u32::MAX,
            ..Default::default()
        };
        assert!(old > important);
    }

    #[test]
    fn packing_is_lossless() {
        let priority = UploadPriority {
            progress: 73,
            lod: 2,
            wait: 513,
            resource: 0xdead_beef,
        };
        assert_eq!(UploadPriority::from_packed(priority.packed()), priority);
        assert_eq!(priority.packed() >> UploadPriority::PROGRESS_SHIFT, 73);
    }

    #[test]
    fn residency_drops_progress_and_wait() {
        let priority = UploadPriority {
            progress: 99,
            lod: 1,
            wait: 7,
            resource: 5,
        };
        let residency = priority.residency();
        assert_eq!(residency, ResidencyPriority { lod: 1, resource: 5 });
        assert_eq!(residency.packed(), UploadPriority::new(1, 5).packed());
    }
}
