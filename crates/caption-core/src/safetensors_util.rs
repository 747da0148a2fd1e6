use anyhow::Result;
use memmap2::MmapOptions;
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use std::fs::File;
use std::path::Path;
use tch::{nn, Device, Kind, Tensor};

pub fn load_safetensors<P: AsRef<Path>>(vs: &mut nn::VarStore, path: P) -> Result<()> {
    let file = File::open(path)?;
    let buffer = unsafe { MmapOptions::new().map(&file)? };
    let tensors = SafeTensors::deserialize(&buffer)?;

    let mut variables = vs.variables();
    let device = vs.device();

    for (name, view) in tensors.tensors() {
        if let Some(var) = variables.get_mut(&name) {
            let shape: Vec<i64> = view.shape().iter().map(|&x| x as i64).collect();
            let kind = match view.dtype() {
                Dtype::F32 => Kind::Float,
                Dtype::F16 => Kind::Half,
                Dtype::BF16 => Kind::BFloat16,
                _ => return Err(anyhow::anyhow!("Unsupported dtype: {:?}", view.dtype())),
            };

            let data = view.data();
            let tch_tensor = Tensor::from_data_size(data, &shape, kind).to_device(device);

            tch::no_grad(|| {
                var.copy_(&tch_tensor);
            });
        } else {
            println!("Warning: Tensor {} found in checkpoint but not in model", name);
        }
    }

    Ok(())
}

pub fn save_safetensors<P: AsRef<Path>>(vs: &nn::VarStore, path: P) -> Result<()> {
    let variables = vs.variables();
    let mut named: Vec<(String, Tensor)> = variables.into_iter().collect();
    named.sort_by(|a, b| a.0.cmp(&b.0));

    // Copy everything to host f32 buffers first; views borrow from these.
    let mut buffers: Vec<(String, Vec<usize>, Vec<f32>)> = Vec::with_capacity(named.len());
    for (name, tensor) in &named {
        let host = tensor
            .detach()
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .contiguous();
        let numel = host.numel();
        let mut data = vec![0f32; numel];
        host.copy_data(&mut data, numel);
        let shape: Vec<usize> = host.size().iter().map(|&d| d as usize).collect();
        buffers.push((name.clone(), shape, data));
    }

    let mut views: Vec<(String, TensorView)> = Vec::with_capacity(buffers.len());
    for (name, shape, data) in &buffers {
        let bytes: &[u8] =
            unsafe { std::slice::from_raw_parts(data.as_ptr() as *const u8, data.len() * 4) };
        views.push((name.clone(), TensorView::new(Dtype::F32, shape.clone(), bytes)?));
    }

    safetensors::serialize_to_file(views, &None, path.as_ref())?;
    Ok(())
}
