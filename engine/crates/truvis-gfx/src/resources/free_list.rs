/// 一段连续的空闲区间，单位为元素
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeSlot {
    pub start: u32,
    pub length: u32,
}

impl FreeSlot {
    #[inline]
    pub fn end(&self) -> u32 {
        self.start + self.length
    }
}

/// 固定容量的线性空间上的空闲链表
///
/// - 空闲区间按 `start` 升序排列，互不重叠
/// - 分配使用 first-fit 策略，可能产生碎片
/// - 释放时与紧邻的上下两个空闲区间合并
///
/// 不变量：`used_elements() + free_elements() == capacity()`
#[derive(Debug, Clone)]
pub struct FreeList {
    capacity: u32,
    slots: Vec<FreeSlot>,
}

// new & init
impl FreeList {
    pub fn new(capacity: u32) -> Self {
        let mut list = Self {
            capacity,
            slots: Vec::new(),
        };
        list.clear();
        list
    }
}

// tools
impl FreeList {
    /// 找到第一个足够大的空闲区间，从其头部切出 `count` 个元素
    ///
    /// 空间不足时返回 `None`，不会修改空闲链表。
    /// `count == 0` 时总是成功，且不占用空间。
    pub fn reserve(&mut self, count: u32) -> Option<u32> {
        if count == 0 {
            return Some(0);
        }

        let index = self.slots.iter().position(|slot| slot.length >= count)?;
        let slot = &mut self.slots[index];
        let start = slot.start;
        if slot.length == count {
            self.slots.remove(index);
        } else {
            slot.start += count;
            slot.length -= count;
        }
        Some(start)
    }

    /// 归还 `[position, position + count)`，并与相邻的空闲区间合并
    ///
    /// # Panics
    /// - 区间超出容量
    /// - 区间与已有的空闲区间重叠（double free）
    pub fn free(&mut self, position: u32, count: u32) {
        if count == 0 {
            return;
        }

        let end = position
            .checked_add(count)
            .filter(|end| *end <= self.capacity)
            .unwrap_or_else(|| panic!("FreeList: free range [{position}, +{count}) exceeds capacity {}", self.capacity));

        // 第一个 start >= position 的空闲区间
        let index = self.slots.partition_point(|slot| slot.start < position);
        if index > 0 {
            let below = self.slots[index - 1];
            assert!(
                below.end() <= position,
                "FreeList: double free of [{position}, {end}), overlaps free slot [{}, {})",
                below.start,
                below.end()
            );
        }
        if let Some(above) = self.slots.get(index) {
            assert!(
                end <= above.start,
                "FreeList: double free of [{position}, {end}), overlaps free slot [{}, {})",
                above.start,
                above.end()
            );
        }

        let touches_below = index > 0 && self.slots[index - 1].end() == position;
        let touches_above = self.slots.get(index).is_some_and(|above| above.start == end);
        match (touches_below, touches_above) {
            (true, true) => {
                let above = self.slots.remove(index);
                self.slots[index - 1].length += count + above.length;
            }
            (true, false) => self.slots[index - 1].length += count,
            (false, true) => {
                let above = &mut self.slots[index];
                above.start = position;
                above.length += count;
            }
            (false, false) => self.slots.insert(
                index,
                FreeSlot {
                    start: position,
                    length: count,
                },
            ),
        }
    }

    /// 整个空间重新变为一个空闲区间
    pub fn clear(&mut self) {
        self.slots.clear();
        if self.capacity > 0 {
            self.slots.push(FreeSlot {
                start: 0,
                length: self.capacity,
            });
        }
    }
}

// getters
impl FreeList {
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn slots(&self) -> &[FreeSlot] {
        &self.slots
    }

    pub fn free_elements(&self) -> u32 {
        self.slots.iter().map(|slot| slot.length).sum()
    }

    pub fn used_elements(&self) -> u32 {
        self.capacity - self.free_elements()
    }

    pub fn largest_free_range(&self) -> u32 {
        self.slots.iter().map(|slot| slot.length).max().unwrap_or(0)
    }
}
