use candle_core::Device;
use once_cell::sync::Lazy;

pub static DEVICE: Lazy<Device> = Lazy::new(|| {
    // CUDA is only available when candle is built with the `cuda` feature;
    // otherwise this always lands on the CPU.
    match Device::new_cuda(0) {
        Ok(device) => {
            log::info!("Successfully initialized CUDA device.");
            device
        }
        Err(err_cuda) => {
            log::debug!(
                "Failed to initialize CUDA device: {:?}. Falling back to CPU.",
                err_cuda
            );
            Device::Cpu
        }
    }
});
