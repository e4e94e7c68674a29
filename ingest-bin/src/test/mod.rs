pub mod tmp_dir;

mod e2e;
