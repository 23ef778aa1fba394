// SPDX-License-Identifier: CEPL-1.0
//! Shader modules from SPIR-V bytes, SPIR-V files, or GLSL compiled at runtime.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use ash::util::read_spv;
use ash::vk;
use ignis_core::Diagnostics;
use ignis_render::Result;
use tracing::debug;

use crate::device::Device;
use crate::error::VkResultExt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn flags(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }

    fn kind(self) -> shaderc::ShaderKind {
        match self {
            ShaderStage::Vertex => shaderc::ShaderKind::Vertex,
            ShaderStage::Fragment => shaderc::ShaderKind::Fragment,
        }
    }

    /// Guesses the stage from a `.vert` / `.frag` style extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        let ext = if ext == "spv" { Path::new(path.file_stem()?).extension()?.to_str()? } else { ext };
        match ext {
            "vert" | "vs" => Some(ShaderStage::Vertex),
            "frag" | "fs" => Some(ShaderStage::Fragment),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum ShaderSource<'a> {
    /// Pre-compiled SPIR-V bytes.
    Spirv(&'a [u8]),
    SpirvFile(&'a Path),
    /// GLSL text; `name` shows up in compiler messages.
    Glsl { source: &'a str, name: &'a str },
    GlslFile(&'a Path),
}

impl ShaderSource<'_> {
    /// `.spv` files are SPIR-V; anything else is compiled as GLSL.
    pub fn file(path: &Path) -> ShaderSource<'_> {
        if path.extension().is_some_and(|e| e == "spv") {
            ShaderSource::SpirvFile(path)
        } else {
            ShaderSource::GlslFile(path)
        }
    }

    /// Produces SPIR-V words for `stage`.
    pub fn load(self, stage: ShaderStage, diag: &Diagnostics) -> Result<Vec<u32>> {
        match self {
            ShaderSource::Spirv(bytes) => parse_spirv(bytes, "shader bytes", diag),
            ShaderSource::SpirvFile(path) => parse_spirv(&read(path, diag)?, &path.display().to_string(), diag),
            ShaderSource::Glsl { source, name } => compile_glsl(source, stage, name, diag),
            ShaderSource::GlslFile(path) => {
                let bytes = read(path, diag)?;
                let source = String::from_utf8_lossy(&bytes);
                compile_glsl(&source, stage, &path.display().to_string(), diag)
            }
        }
    }
}

fn read(path: &Path, diag: &Diagnostics) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| diag.fail("load_shader", format!("{}: {e}", path.display())).into())
}

fn parse_spirv(bytes: &[u8], name: &str, diag: &Diagnostics) -> Result<Vec<u32>> {
    read_spv(&mut Cursor::new(bytes)).map_err(|e| diag.fail("load_shader", format!("{name}: {e}")).into())
}

pub fn compile_glsl(source: &str, stage: ShaderStage, name: &str, diag: &Diagnostics) -> Result<Vec<u32>> {
    let fail = |msg: String| diag.fail("compile_shader", format!("{name}: {msg}"));
    let compiler = shaderc::Compiler::new().map_err(|e| fail(e.to_string()))?;
    let mut opts = shaderc::CompileOptions::new().map_err(|e| fail(e.to_string()))?;
    opts.set_target_env(shaderc::TargetEnv::Vulkan, shaderc::EnvVersion::Vulkan1_0 as u32);

    let artifact = compiler
        .compile_into_spirv(source, stage.kind(), name, "main", Some(&opts))
        .map_err(|e| fail(e.to_string()))?;
    if artifact.get_num_warnings() > 0 {
        diag.warn(&format!("{name}: {}", artifact.get_warning_messages()));
    }
    Ok(artifact.as_binary().to_vec())
}

/// SPIR-V kept alongside its module so the module can be rebuilt on a
/// device change.
pub struct Shader {
    pub stage: ShaderStage,
    pub(crate) code: Vec<u32>,
    pub(crate) module: vk::ShaderModule,
}

impl Shader {
    /// Creates the module on `device`. Ownership passes to the context on
    /// registration; an unregistered shader must be released with
    /// [`Shader::destroy`].
    pub fn build(device: &Device, stage: ShaderStage, code: Vec<u32>) -> Result<Self> {
        let mut shader = Self { stage, code, module: vk::ShaderModule::null() };
        unsafe { shader.create_module(device) }?;
        Ok(shader)
    }

    pub fn from_source(device: &Device, stage: ShaderStage, source: ShaderSource<'_>) -> Result<Self> {
        let code = source.load(stage, &device.diag)?;
        Self::build(device, stage, code)
    }

    pub(crate) unsafe fn create_module(&mut self, device: &Device) -> Result<()> {
        let info = vk::ShaderModuleCreateInfo {
            code_size: self.code.len() * 4,
            p_code: self.code.as_ptr(),
            ..Default::default()
        };
        self.module =
            unsafe { device.raw.create_shader_module(&info, None) }.or_fatal(&device.diag, "create_shader_module")?;
        debug!(stage = ?self.stage, words = self.code.len(), "shader module created");
        Ok(())
    }

    /// # Safety
    /// `device` must be the device the module was created on, and no
    /// pending GPU work may still reference it.
    pub unsafe fn destroy(&mut self, device: &Device) {
        if self.module != vk::ShaderModule::null() {
            unsafe { device.raw.destroy_shader_module(self.module, None) };
            self.module = vk::ShaderModule::null();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_from_extension() {
        assert_eq!(ShaderStage::from_path(Path::new("a/tri.vert")), Some(ShaderStage::Vertex));
        assert_eq!(ShaderStage::from_path(Path::new("tri.frag.spv")), Some(ShaderStage::Fragment));
        assert_eq!(ShaderStage::from_path(Path::new("tri.glsl")), None);
    }

    #[test]
    fn spv_extension_selects_binary_loader() {
        assert!(matches!(ShaderSource::file(Path::new("x.vert.spv")), ShaderSource::SpirvFile(_)));
        assert!(matches!(ShaderSource::file(Path::new("x.vert")), ShaderSource::GlslFile(_)));
    }

    #[test]
    fn builtin_spirv_parses() {
        let diag = Diagnostics::new(|_, _| {});
        let words = ShaderSource::Spirv(crate::builtin::TRIANGLE_VERT).load(ShaderStage::Vertex, &diag).unwrap();
        assert_eq!(words[0], 0x0723_0203);
    }

    #[test]
    fn garbage_spirv_is_fatal() {
        let diag = Diagnostics::new(|_, _| {});
        assert!(ShaderSource::Spirv(&[1, 2, 3]).load(ShaderStage::Vertex, &diag).is_err());
    }

    #[test]
    fn missing_file_names_the_path() {
        let diag = Diagnostics::new(|_, _| {});
        let err = ShaderSource::SpirvFile(Path::new("/nonexistent/x.spv"))
            .load(ShaderStage::Vertex, &diag)
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/x.spv"));
    }

    #[test]
    fn glsl_compiles_and_errors_are_fatal() {
        let diag = Diagnostics::new(|_, _| {});
        let ok = "#version 450\nlayout(location = 0) out vec4 c;\nvoid main() { c = vec4(1.0); }\n";
        let words = compile_glsl(ok, ShaderStage::Fragment, "ok.frag", &diag).unwrap();
        assert_eq!(words[0], 0x0723_0203);
        assert!(compile_glsl("not glsl", ShaderStage::Fragment, "bad.frag", &diag).is_err());
    }
}
