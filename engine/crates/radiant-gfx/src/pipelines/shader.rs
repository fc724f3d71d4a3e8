use std::{
    path::{Path, PathBuf},
    rc::Rc,
    time::SystemTime,
};

use crate::error::ShaderCompileError;

/// 编译好的 shader，对核心层来说是不透明的字节
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderBinary {
    bytes: Rc<[u8]>,
}

impl ShaderBinary {
    pub fn new(bytes: impl Into<Rc<[u8]>>) -> Self {
        Self { bytes: bytes.into() }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// 按照 SPIR-V 的 32 位 word 读取，末尾不足 4 字节的部分被忽略
    pub fn words(&self) -> Vec<u32> {
        self.bytes
            .chunks_exact(4)
            .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
            .collect()
    }
}

/// shader 的编译器，只在 reload 和 pipeline 构建时被调用
pub trait ShaderCompiler {
    fn compile(&self, path: &Path, entry_points: &[String]) -> Result<ShaderBinary, ShaderCompileError>;
}

/// 读取预先编译好的 `.spv` 文件
#[derive(Debug, Default, Clone, Copy)]
pub struct SpirvFileCompiler;

impl SpirvFileCompiler {
    pub const SPIRV_MAGIC: u32 = 0x0723_0203;
}

impl ShaderCompiler for SpirvFileCompiler {
    fn compile(&self, path: &Path, _entry_points: &[String]) -> Result<ShaderBinary, ShaderCompileError> {
        let bytes = std::fs::read(path).map_err(|err| ShaderCompileError::new(path, err.to_string()))?;

        if bytes.len() < 4 || bytes.len() % 4 != 0 {
            return Err(ShaderCompileError::new(
                path,
                format!("spir-v length {} is not a non-zero multiple of 4", bytes.len()),
            ));
        }
        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != Self::SPIRV_MAGIC {
            return Err(ShaderCompileError::new(path, format!("bad spir-v magic {:#010x}", magic)));
        }

        Ok(ShaderBinary::new(bytes))
    }
}

/// 一个 shader 源文件，以及最近一次编译成功的结果
pub struct ShaderProgram {
    path: PathBuf,
    entry_points: Vec<String>,

    /// 最近一次编译成功的结果
    binary: ShaderBinary,
    /// 最近一次编译时源文件的修改时间
    last_write: Option<SystemTime>,
    compile_failed: bool,
    last_error: Option<ShaderCompileError>,
}

// new & init
impl ShaderProgram {
    /// 首次编译，失败时直接返回错误
    pub fn new(
        path: impl Into<PathBuf>,
        entry_points: Vec<String>,
        compiler: &dyn ShaderCompiler,
    ) -> Result<Self, ShaderCompileError> {
        let path = path.into();
        let last_write = Self::modified_time(&path);
        let binary = compiler.compile(&path, &entry_points)?;
        log::info!("shader '{}' compiled, {} bytes", path.display(), binary.len());

        Ok(Self {
            path,
            entry_points,
            binary,
            last_write,
            compile_failed: false,
            last_error: None,
        })
    }

    fn modified_time(path: &Path) -> Option<SystemTime> {
        std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
    }
}

// getters
impl ShaderProgram {
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }
    #[inline]
    pub fn entry_points(&self) -> &[String] {
        &self.entry_points
    }
    #[inline]
    pub fn binary(&self) -> &ShaderBinary {
        &self.binary
    }
    #[inline]
    pub fn compile_failed(&self) -> bool {
        self.compile_failed
    }
    #[inline]
    pub fn last_error(&self) -> Option<&ShaderCompileError> {
        self.last_error.as_ref()
    }
}

// reload
impl ShaderProgram {
    /// 源文件的修改时间与上一次编译时不同
    pub fn needs_reload(&self) -> bool {
        let current = Self::modified_time(&self.path);
        current.is_some() && current != self.last_write
    }

    /// 重新编译
    ///
    /// 失败时保留之前的 binary，记录错误并返回 false。无论成功与否都会更新 `last_write`，
    /// 同一个错误的文件不会被反复编译
    pub fn reload(&mut self, compiler: &dyn ShaderCompiler) -> bool {
        self.last_write = Self::modified_time(&self.path);
        match compiler.compile(&self.path, &self.entry_points) {
            Ok(binary) => {
                log::info!("shader '{}' reloaded", self.path.display());
                self.binary = binary;
                self.compile_failed = false;
                self.last_error = None;
                true
            }
            Err(err) => {
                log::error!("{}", err);
                self.compile_failed = true;
                self.last_error = Some(err);
                false
            }
        }
    }

    /// 新的 binary 编译成功，但是无法用于创建 pipeline，恢复为 previous
    pub fn reject(&mut self, previous: ShaderBinary, err: ShaderCompileError) {
        log::error!("{}", err);
        self.binary = previous;
        self.compile_failed = true;
        self.last_error = Some(err);
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use std::{
        io::Write,
        path::Path,
        time::{Duration, SystemTime},
    };

    use super::SpirvFileCompiler;

    /// 一个最小的合法 spir-v：magic + 4 个 word，第二个参数用来区分内容
    pub fn spirv_bytes(tag: u32) -> Vec<u8> {
        [SpirvFileCompiler::SPIRV_MAGIC, 0x0001_0500, 0, tag, 0]
            .iter()
            .flat_map(|word| word.to_le_bytes())
            .collect()
    }

    /// 写入文件，并将修改时间往后推 offset_secs 秒，避免文件系统时间精度导致修改时间不变
    pub fn write_file(path: &Path, bytes: &[u8], offset_secs: u64) {
        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(bytes).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(offset_secs)).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::{test_utils::*, *};

    #[test]
    fn test_spirv_validation() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.spv");
        let bad_magic = dir.path().join("bad_magic.spv");
        let unaligned = dir.path().join("unaligned.spv");
        write_file(&good, &spirv_bytes(1), 0);
        write_file(&bad_magic, &[1, 2, 3, 4, 5, 6, 7, 8], 0);
        write_file(&unaligned, &spirv_bytes(1)[..7], 0);

        let compiler = SpirvFileCompiler;
        let binary = compiler.compile(&good, &[]).unwrap();
        assert_eq!(binary.words()[0], SpirvFileCompiler::SPIRV_MAGIC);
        assert!(compiler.compile(&bad_magic, &[]).unwrap_err().message.contains("magic"));
        assert!(compiler.compile(&unaligned, &[]).is_err());
        assert!(compiler.compile(&dir.path().join("missing.spv"), &[]).is_err());
    }

    #[test]
    fn test_failed_reload_keeps_binary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rt.spv");
        write_file(&path, &spirv_bytes(1), 0);

        let compiler = SpirvFileCompiler;
        let mut program = ShaderProgram::new(&path, vec!["main".to_string()], &compiler).unwrap();
        let original = program.binary().clone();
        assert!(!program.needs_reload());

        write_file(&path, b"not spir-v", 10);
        assert!(program.needs_reload());
        assert!(!program.reload(&compiler));
        assert_eq!(program.binary(), &original);
        assert!(program.compile_failed());
        assert!(!program.last_error().unwrap().message.is_empty());
        // 同一个错误的文件不会再次触发
        assert!(!program.needs_reload());

        write_file(&path, &spirv_bytes(2), 20);
        assert!(program.reload(&compiler));
        assert_ne!(program.binary(), &original);
        assert!(program.last_error().is_none());
    }
}
