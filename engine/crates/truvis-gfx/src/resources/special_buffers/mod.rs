pub mod stage_buffer;
