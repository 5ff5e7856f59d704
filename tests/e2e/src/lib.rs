//! PGA 端到端测试支持库

pub mod test_env;
