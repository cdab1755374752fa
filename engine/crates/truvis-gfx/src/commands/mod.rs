pub mod image_copy;
