pub mod candle_aux_layers;
pub mod candle_data_loader;
pub mod candle_data_loader_util;
pub mod candle_discretize;
pub mod candle_exec_context;
pub mod candle_image_datasets;
pub mod candle_image_output;
pub mod candle_loss_functions;
pub mod candle_masked_conv;
pub mod candle_model_traits;
pub mod candle_optimizer;
pub mod candle_pixel_cnn;
pub mod candle_sampler;
pub mod candle_trainer;
pub mod errors;
pub mod experiment_store;

pub use candle_core;
pub use candle_nn;
