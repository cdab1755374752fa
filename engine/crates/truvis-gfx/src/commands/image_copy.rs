use ash::vk;

/// 将一个 mip 中一段线性的 texel 区间拆分为 `vk::BufferImageCopy`
///
/// staging buffer 中的数据是紧密排列的，但这段区间的起止位置不一定与 image 的行对齐，
/// 因此需要拆为：起始的残缺行、中间的完整行、末尾的残缺行。
///
/// - `staging_offset`: 区间第一个 texel 在 staging buffer 中的字节偏移
/// - `first_texel`: 区间第一个 texel 在 mip 中的线性下标
/// - `texel_count`: 区间的 texel 数量
/// - `row_width`: mip 的宽度（texel）
pub fn row_chunked_image_copies(
    staging_offset: vk::DeviceSize,
    first_texel: u64,
    texel_count: u64,
    row_width: u32,
    texel_size: u32,
    mip_level: u32,
) -> Vec<vk::BufferImageCopy> {
    assert!(row_width > 0, "row_width must not be zero");

    let row_width = row_width as u64;
    let texel_size = texel_size as u64;
    let mut regions = Vec::with_capacity(3);

    let mut texel = first_texel;
    let mut buffer_offset = staging_offset;
    let end = first_texel + texel_count;
    while texel < end {
        let x = texel % row_width;
        let y = texel / row_width;
        let remaining = end - texel;

        let (width, height) = if x == 0 && remaining >= row_width {
            (row_width, remaining / row_width)
        } else {
            ((row_width - x).min(remaining), 1)
        };

        regions.push(vk::BufferImageCopy {
            buffer_offset,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D {
                x: x as i32,
                y: y as i32,
                z: 0,
            },
            image_extent: vk::Extent3D {
                width: width as u32,
                height: height as u32,
                depth: 1,
            },
        });

        let copied = width * height;
        texel += copied;
        buffer_offset += copied * texel_size;
    }

    regions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn covered_texels(regions: &[vk::BufferImageCopy]) -> u64 {
        regions
            .iter()
            .map(|region| region.image_extent.width as u64 * region.image_extent.height as u64)
            .sum()
    }

    #[test]
    fn aligned_range_is_one_region() {
        let regions = row_chunked_image_copies(256, 0, 16 * 4, 16, 4, 2);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].buffer_offset, 256);
        assert_eq!(regions[0].image_extent.width, 16);
        assert_eq!(regions[0].image_extent.height, 4);
        assert_eq!(regions[0].image_subresource.mip_level, 2);
    }

    #[test]
    fn unaligned_range_splits_head_body_tail() {
        // 宽 8，从第 0 行第 5 个 texel 开始，拷贝 3 + 16 + 2 个 texel
        let regions = row_chunked_image_copies(0, 5, 21, 8, 4, 0);
        assert_eq!(regions.len(), 3);

        let head = &regions[0];
        assert_eq!((head.image_offset.x, head.image_offset.y), (5, 0));
        assert_eq!((head.image_extent.width, head.image_extent.height), (3, 1));
        assert_eq!(head.buffer_offset, 0);

        let body = &regions[1];
        assert_eq!((body.image_offset.x, body.image_offset.y), (0, 1));
        assert_eq!((body.image_extent.width, body.image_extent.height), (8, 2));
        assert_eq!(body.buffer_offset, 3 * 4);

        let tail = &regions[2];
        assert_eq!((tail.image_offset.x, tail.image_offset.y), (0, 3));
        assert_eq!((tail.image_extent.width, tail.image_extent.height), (2, 1));
        assert_eq!(tail.buffer_offset, 19 * 4);

        assert_eq!(covered_texels(&regions), 21);
    }

    #[test]
    fn range_inside_one_row() {
        let regions = row_chunked_image_copies(64, 9, 3, 8, 1, 1);
        assert_eq!(regions.len(), 1);
        assert_eq!((regions[0].image_offset.x, regions[0].image_offset.y), (1, 1));
        assert_eq!(regions[0].image_extent.width, 3);
    }

    #[test]
    fn empty_range_has_no_regions() {
        assert!(row_chunked_image_copies(0, 10, 0, 8, 4, 0).is_empty());
    }
}
