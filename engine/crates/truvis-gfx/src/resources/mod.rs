pub mod dynamic_buffer;
pub mod free_list;
pub mod handles;
pub mod resource_data;
pub mod special_buffers;
