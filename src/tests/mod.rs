// Cross-module tests for the sampling stack
pub mod test_sampler;
