use std::path::Path;

use itertools::Itertools;
use radiant_gfx::{
    backend::types::{BufferUsage, DescriptorView, IndexFormat, MemoryKind, TextureUsage, VertexFormat},
    descriptors::descriptor_table::DescriptorAllocation,
    error::GfxResult,
    pipelines::shader_table::HitGroupRecord,
    raytracing::{
        blas::{Blas, GeometryRecord},
        instance::{InstanceDescriptor, InstanceFlags},
        tlas::Tlas,
    },
    render_context::RenderContext,
    resources::{buffer::GpuBuffer, release_queue::ReleaseQueue, texture::GpuTexture},
};

use crate::{
    components::{
        material::MaterialData,
        mesh::{MeshData, Vertex},
        model::{ModelData, ModelLoader},
        texture::TextureData,
    },
    error::SceneResult,
};

/// GPU 上的 mesh：顶点、索引以及它的 BLAS
pub struct Mesh {
    name: String,
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    blas: Blas,
    transform: glam::Mat4,
    material_index: i32,
}

impl Mesh {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
    #[inline]
    pub fn vertex_address(&self) -> u64 {
        self.vertex_buffer.device_address()
    }
    #[inline]
    pub fn index_address(&self) -> u64 {
        self.index_buffer.device_address()
    }
    #[inline]
    pub fn blas(&self) -> &Blas {
        &self.blas
    }
    #[inline]
    pub fn transform(&self) -> glam::Mat4 {
        self.transform
    }
    #[inline]
    pub fn material_index(&self) -> i32 {
        self.material_index
    }
}

/// GPU 上的贴图，以及它在描述符表中的 SRV
pub struct SceneTexture {
    name: String,
    texture: GpuTexture,
    srv: DescriptorAllocation,
}

impl SceneTexture {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
    #[inline]
    pub fn texture(&self) -> &GpuTexture {
        &self.texture
    }
    #[inline]
    pub fn srv(&self) -> DescriptorAllocation {
        self.srv
    }
}

pub struct Model {
    name: String,
    meshes: Vec<Mesh>,
    /// texture index 已经替换为描述符表中的位置
    materials: Vec<MaterialData>,
    /// 与 model 的生命周期相同
    textures: Vec<SceneTexture>,
}

impl Model {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
    #[inline]
    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }
    #[inline]
    pub fn materials(&self) -> &[MaterialData] {
        &self.materials
    }
    #[inline]
    pub fn textures(&self) -> &[SceneTexture] {
        &self.textures
    }
}

/// `Scene::refresh_tlas` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlasRefresh {
    /// 变换没有变化
    Unchanged,
    /// instance 数量不变，原地 refit
    Refit,
    /// instance 数量变化，重新构建
    Rebuilt,
}

/// 所有已加载的 model，以及由它们构建的 TLAS 和材质 buffer
///
/// instance、hit group record 的顺序都是 model 的加载顺序，然后是 mesh 在 model 中的顺序。
/// 被替换掉的 TLAS 和材质 buffer 放入 ReleaseQueue，等到图形队列完成之后才释放
pub struct Scene {
    models: Vec<Model>,
    tlas: Option<Tlas>,
    /// 有 mesh 的变换被修改，需要 refit
    transforms_dirty: bool,

    material_buffer: Option<GpuBuffer>,
    material_srv: Option<DescriptorAllocation>,

    release_queue: ReleaseQueue,
}

// new & init
impl Scene {
    pub fn new() -> Self {
        Self {
            models: Vec::new(),
            tlas: None,
            transforms_dirty: false,
            material_buffer: None,
            material_srv: None,
            release_queue: ReleaseQueue::new(),
        }
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

// 加载
impl Scene {
    /// 通过加载器读取模型文件，然后加载
    pub fn load_model_from(&mut self, ctx: &RenderContext, loader: &dyn ModelLoader, path: &Path) -> SceneResult<usize> {
        let data = loader.load(path)?;
        self.load_model(ctx, data)
    }

    /// 加载一个 model，返回它在场景中的序号
    ///
    /// # 过程
    ///
    /// 1. 通过上传器写入顶点、索引以及贴图，然后 flush
    /// 2. 每张贴图分配一个 SRV，材质中的 texture index 替换为 SRV 的位置
    /// 3. 每个 mesh 同步构建一个 BLAS
    /// 4. 用所有 mesh 重新构建 TLAS，旧的 TLAS 延迟释放
    /// 5. 重新上传所有材质，然后 flush
    ///
    /// 数据不合法时返回内容错误，场景保持不变
    pub fn load_model(&mut self, ctx: &RenderContext, data: ModelData) -> SceneResult<usize> {
        let _span = radiant_crate_tools::profile_span!("Scene::load_model");
        data.validate()?;

        let ModelData {
            name,
            meshes,
            materials,
            textures,
        } = data;
        let buffers = meshes
            .iter()
            .map(|mesh| Self::upload_mesh(ctx, &name, mesh))
            .collect::<GfxResult<Vec<_>>>()?;
        let textures = Self::upload_textures(ctx, &name, textures)?;
        ctx.upload().flush()?;

        let slots = textures.iter().map(|texture| texture.srv.index).collect_vec();
        let materials = materials.into_iter().map(|material| material.with_texture_slots(&slots)).collect_vec();

        let meshes = meshes
            .into_iter()
            .zip(buffers)
            .map(|(mesh, (vertex_buffer, index_buffer))| -> GfxResult<Mesh> {
                let record = GeometryRecord {
                    vertex_address: vertex_buffer.device_address(),
                    vertex_count: mesh.vertices.len() as u32,
                    vertex_stride: Vertex::STRIDE,
                    vertex_format: VertexFormat::Float32x3,
                    index_address: index_buffer.device_address(),
                    index_count: mesh.indices.len() as u32,
                    index_format: IndexFormat::U32,
                    transform: mesh.transform,
                    material_index: mesh.material_index,
                };
                let blas = Blas::build(ctx, &[record], format!("{}/{}", name, mesh.name))?;
                Ok(Mesh {
                    name: mesh.name,
                    vertex_buffer,
                    index_buffer,
                    blas,
                    transform: mesh.transform,
                    material_index: mesh.material_index,
                })
            })
            .collect::<GfxResult<Vec<_>>>()?;

        log::info!(
            "model '{}' loaded: {} meshes, {} materials, {} textures",
            name,
            meshes.len(),
            materials.len(),
            textures.len()
        );
        self.models.push(Model {
            name,
            meshes,
            materials,
            textures,
        });

        self.rebuild_tlas(ctx)?;
        self.upload_materials(ctx)?;
        Ok(self.models.len() - 1)
    }

    fn upload_mesh(ctx: &RenderContext, model: &str, mesh: &MeshData) -> GfxResult<(GpuBuffer, GpuBuffer)> {
        let usage = BufferUsage::TRANSFER_DST | BufferUsage::STORAGE | BufferUsage::ACCELERATION_STRUCTURE_INPUT;
        let vertex_buffer = ctx.allocator().create_buffer(
            std::mem::size_of_val(mesh.vertices.as_slice()) as u64,
            usage | BufferUsage::VERTEX,
            MemoryKind::DeviceLocal,
            format!("{}/{}-vertices", model, mesh.name),
        )?;
        let index_buffer = ctx.allocator().create_buffer(
            std::mem::size_of_val(mesh.indices.as_slice()) as u64,
            usage | BufferUsage::INDEX,
            MemoryKind::DeviceLocal,
            format!("{}/{}-indices", model, mesh.name),
        )?;

        let mut upload = ctx.upload();
        upload.upload_slice(&vertex_buffer, &mesh.vertices)?;
        upload.upload_slice(&index_buffer, &mesh.indices)?;
        Ok((vertex_buffer, index_buffer))
    }

    /// 录制所有贴图的上传，并为每张贴图写入 SRV
    ///
    /// 失败时释放已经分配的 SRV
    fn upload_textures(ctx: &RenderContext, model: &str, textures: Vec<TextureData>) -> GfxResult<Vec<SceneTexture>> {
        let mut uploaded: Vec<SceneTexture> = Vec::with_capacity(textures.len());
        for data in textures {
            match Self::upload_texture(ctx, model, data) {
                Ok(texture) => uploaded.push(texture),
                Err(err) => {
                    let mut descriptor_table = ctx.descriptor_table_mut();
                    for texture in uploaded {
                        descriptor_table.free(texture.srv);
                    }
                    return Err(err);
                }
            }
        }
        Ok(uploaded)
    }

    fn upload_texture(ctx: &RenderContext, model: &str, data: TextureData) -> GfxResult<SceneTexture> {
        let texture = ctx.allocator().create_texture(
            data.width,
            data.height,
            data.format,
            TextureUsage::SAMPLED | TextureUsage::TRANSFER_DST,
            format!("{}/{}", model, data.name),
        )?;
        ctx.upload().upload_image(&texture, &data.pixels, data.width, data.height, data.format)?;

        let srv = ctx.descriptor_table_mut().allocate()?;
        ctx.descriptor_table().write_view(srv, DescriptorView::SampledTexture(texture.handle()));
        Ok(SceneTexture {
            name: data.name,
            texture,
            srv,
        })
    }

    /// 所有 model 的材质依次放入一个 structured buffer
    ///
    /// 旧的 buffer 以及描述符可能还在被正在执行的帧读取，延迟释放
    fn upload_materials(&mut self, ctx: &RenderContext) -> GfxResult<()> {
        let materials = self.models.iter().flat_map(|model| model.materials.iter().copied()).collect_vec();
        let buffer = ctx.allocator().create_buffer(
            std::mem::size_of_val(materials.as_slice()) as u64,
            BufferUsage::TRANSFER_DST | BufferUsage::STORAGE,
            MemoryKind::DeviceLocal,
            "materials",
        )?;
        if !materials.is_empty() {
            ctx.upload().upload_slice(&buffer, &materials)?;
        }

        let srv = ctx.descriptor_table_mut().allocate()?;
        ctx.descriptor_table().write_view(
            srv,
            DescriptorView::StorageBuffer {
                buffer: buffer.handle(),
                offset: 0,
                range: buffer.size(),
            },
        );
        ctx.upload().flush()?;

        let in_flight = ctx.queue().last_signaled();
        if let Some(old) = self.material_buffer.replace(buffer) {
            self.release_queue.defer(old, in_flight);
        }
        if let Some(old) = self.material_srv.replace(srv) {
            self.release_queue.defer(old, in_flight);
        }
        log::debug!("{} materials uploaded", materials.len());
        Ok(())
    }
}

// TLAS
impl Scene {
    /// 所有 mesh 的 instance，顺序与 hit group record 一致
    ///
    /// 第 i 个 instance 的 instance_id 以及 hit group offset 都是 i，每个 mesh 只有一个 hit record
    pub fn instance_descriptors(&self) -> Vec<InstanceDescriptor> {
        self.meshes()
            .enumerate()
            .map(|(index, mesh)| InstanceDescriptor {
                blas_address: mesh.blas.device_address(),
                transform: mesh.transform,
                mask: 0xFF,
                hit_group_offset: index as u32,
                instance_id: index as u32,
                flags: InstanceFlags::TRIANGLE_CULL_DISABLE,
            })
            .collect()
    }

    /// 修改之后需要调用 `refresh_tlas`
    pub fn set_mesh_transform(&mut self, model: usize, mesh: usize, transform: glam::Mat4) {
        self.models[model].meshes[mesh].transform = transform;
        self.transforms_dirty = true;
    }

    /// instance 数量不变时 refit，否则重新构建
    pub fn refresh_tlas(&mut self, ctx: &RenderContext) -> GfxResult<TlasRefresh> {
        let instance_count = self.instance_count();
        match self.tlas.as_ref().map(Tlas::instance_count) {
            Some(built) if built == instance_count => {
                if !self.transforms_dirty {
                    return Ok(TlasRefresh::Unchanged);
                }
                let instances = self.instance_descriptors();
                if let Some(tlas) = &mut self.tlas {
                    tlas.update(ctx, &instances)?;
                }
                self.transforms_dirty = false;
                Ok(TlasRefresh::Refit)
            }
            None if instance_count == 0 => Ok(TlasRefresh::Unchanged),
            _ => {
                self.rebuild_tlas(ctx)?;
                Ok(TlasRefresh::Rebuilt)
            }
        }
    }

    /// 没有任何 mesh 时不存在 TLAS
    fn rebuild_tlas(&mut self, ctx: &RenderContext) -> GfxResult<()> {
        let in_flight = ctx.queue().last_signaled();
        let instances = self.instance_descriptors();
        let tlas = if instances.is_empty() {
            None
        } else {
            Some(Tlas::build(ctx, &instances, "scene")?)
        };

        if let Some(old) = std::mem::replace(&mut self.tlas, tlas) {
            self.release_queue.defer(old, in_flight);
        }
        self.transforms_dirty = false;
        Ok(())
    }
}

// getters
impl Scene {
    #[inline]
    pub fn models(&self) -> &[Model] {
        &self.models
    }

    /// 所有 model 中的 mesh，按照加载顺序
    pub fn meshes(&self) -> impl Iterator<Item = &Mesh> {
        self.models.iter().flat_map(|model| model.meshes.iter())
    }

    #[inline]
    pub fn instance_count(&self) -> usize {
        self.models.iter().map(|model| model.meshes.len()).sum()
    }

    #[inline]
    pub fn material_count(&self) -> usize {
        self.models.iter().map(|model| model.materials.len()).sum()
    }

    #[inline]
    pub fn texture_count(&self) -> usize {
        self.models.iter().map(|model| model.textures.len()).sum()
    }

    /// 材质 structured buffer，加载第一个 model 之后才存在
    #[inline]
    pub fn material_buffer(&self) -> Option<&GpuBuffer> {
        self.material_buffer.as_ref()
    }

    #[inline]
    pub fn tlas(&self) -> Option<&Tlas> {
        self.tlas.as_ref()
    }

    /// 没有 TLAS 时为 0
    #[inline]
    pub fn tlas_address(&self) -> u64 {
        self.tlas.as_ref().map_or(0, Tlas::device_address)
    }

    /// 材质 structured buffer 的描述符，加载第一个 model 之后才存在
    #[inline]
    pub fn material_srv(&self) -> Option<DescriptorAllocation> {
        self.material_srv
    }

    #[inline]
    pub fn pending_release_count(&self) -> usize {
        self.release_queue.pending_count()
    }

    /// 每个 mesh 一个 hit group record
    ///
    /// 材质的 index 加上之前所有 model 的材质数量；没有材质的 mesh 使用 0
    pub fn hit_group_records(&self) -> Vec<HitGroupRecord> {
        let mut records = Vec::with_capacity(self.instance_count());
        let mut material_offset = 0;
        for model in &self.models {
            for mesh in &model.meshes {
                let material_index = if mesh.material_index >= 0 {
                    material_offset + mesh.material_index as u32
                } else {
                    0
                };
                records.push(HitGroupRecord::new(mesh.vertex_address(), mesh.index_address(), material_index));
            }
            material_offset += model.materials.len() as u32;
        }
        records
    }
}

// tools
impl Scene {
    /// 释放图形队列已经完成的资源，返回释放的数量
    pub fn collect_released(&mut self, ctx: &RenderContext) -> usize {
        let completed = ctx.queue().completed_value();
        self.release_queue.collect(completed, &mut ctx.descriptor_table_mut())
    }

    /// 销毁之前调用，释放场景占用的描述符。调用者需要保证 GPU 已经空闲
    pub fn release_all(&mut self, ctx: &RenderContext) {
        let mut descriptor_table = ctx.descriptor_table_mut();
        if let Some(srv) = self.material_srv.take() {
            descriptor_table.free(srv);
        }
        for model in &mut self.models {
            for texture in model.textures.drain(..) {
                descriptor_table.free(texture.srv);
            }
        }
        self.release_queue.clear(&mut descriptor_table);
    }
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, rc::Rc, time::Duration};

    use radiant_gfx::{
        backend::{
            mock::MockBackend,
            types::{ShaderTableProperties, TextureFormat},
        },
        commands::gfx_command::TextureState,
        config::GfxConfig,
        pipelines::shader_table::ShaderTableLayout,
    };

    use super::*;
    use crate::{error::SceneError, shapes::triangle::Triangle};

    fn context() -> (Rc<MockBackend>, RenderContext) {
        let backend = Rc::new(MockBackend::with_latency(Duration::from_millis(1)));
        let ctx = RenderContext::new(backend.clone(), GfxConfig::default()).unwrap();
        (backend, ctx)
    }

    /// mesh i 有 i + 1 个三角形
    fn model(name: &str, mesh_materials: &[i32], material_count: usize) -> ModelData {
        let mut model = ModelData::new(name);
        model.materials = vec![MaterialData::default(); material_count];
        for (i, material_index) in mesh_materials.iter().enumerate() {
            let mut mesh = Triangle::mesh_data(
                format!("mesh-{}", i),
                glam::Mat4::from_translation(glam::vec3(i as f32, 0.0, 0.0)),
                *material_index,
            );
            mesh.indices = mesh.indices.repeat(i + 1);
            model.meshes.push(mesh);
        }
        model
    }

    struct FakeLoader;
    impl ModelLoader for FakeLoader {
        fn load(&self, path: &Path) -> SceneResult<ModelData> {
            match path.extension().and_then(|ext| ext.to_str()) {
                Some("fake") => Ok(model("fake", &[-1], 0)),
                _ => Err(SceneError::UnsupportedFormat {
                    path: path.to_path_buf(),
                }),
            }
        }
    }

    #[test]
    fn test_two_models_scenario() {
        let (_backend, ctx) = context();
        let mut scene = Scene::new();

        scene.load_model(&ctx, model("first", &[0, 1, 2, 3, 4], 5)).unwrap();
        scene.load_model(&ctx, model("second", &[0, 1, -1], 2)).unwrap();

        assert_eq!(scene.instance_count(), 8);
        assert_eq!(scene.instance_descriptors().len(), 8);
        let records = scene.hit_group_records();
        assert_eq!(records.len(), 8);
        assert_eq!(records.iter().map(|record| record.material_index).collect_vec(), vec![0, 1, 2, 3, 4, 5, 6, 0]);
        assert_eq!(scene.material_count(), 7);
        assert!(scene.material_srv().is_some());
        assert_eq!(scene.tlas().unwrap().instance_count(), 8);
    }

    #[test]
    fn test_instances_match_shader_table() {
        let props = ShaderTableProperties {
            handle_size: 32,
            handle_alignment: 32,
            base_alignment: 64,
            max_recursion_depth: 31,
        };

        for mesh_count in [0usize, 1, 3] {
            let (_backend, ctx) = context();
            let mut scene = Scene::new();
            let materials = vec![-1; mesh_count];
            scene.load_model(&ctx, model("model", &materials, 0)).unwrap();

            let records = scene.hit_group_records();
            let instances = scene.instance_descriptors();
            assert_eq!(records.len(), instances.len());
            assert_eq!(instances.len(), mesh_count);

            let layout = ShaderTableLayout::new(&props, 1, records.len() as u32);
            assert_eq!(layout.hit_count as usize, instances.len());
            let mut cumulative = 0;
            for (i, (instance, mesh)) in instances.iter().zip(scene.meshes()).enumerate() {
                assert_eq!(instance.hit_group_offset, cumulative);
                assert_eq!(instance.instance_id, i as u32);
                assert_eq!(instance.blas_address, mesh.blas().device_address());
                assert_eq!(mesh.blas().primitive_count(), i as u32 + 1);
                cumulative += 1;
            }

            match scene.tlas() {
                Some(tlas) => {
                    let gpu = tlas.read_instances().unwrap();
                    let expected = instances.iter().map(InstanceDescriptor::to_gpu).collect_vec();
                    assert_eq!(gpu, expected);
                }
                None => assert_eq!(mesh_count, 0),
            }
        }
    }

    #[test]
    fn test_refresh_refits_then_rebuilds() {
        let (backend, ctx) = context();
        let mut scene = Scene::new();
        scene.load_model(&ctx, model("first", &[-1, -1], 0)).unwrap();
        let handle = scene.tlas().unwrap().accel().handle();

        assert_eq!(scene.refresh_tlas(&ctx).unwrap(), TlasRefresh::Unchanged);

        scene.set_mesh_transform(0, 1, glam::Mat4::from_translation(glam::vec3(0.0, 5.0, 0.0)));
        assert_eq!(scene.refresh_tlas(&ctx).unwrap(), TlasRefresh::Refit);
        assert_eq!(scene.tlas().unwrap().accel().handle(), handle);
        assert_eq!(backend.accel_build_counts(handle), (1, 1));
        let instances = scene.tlas().unwrap().read_instances().unwrap();
        assert_eq!(instances[1].transform[7], 5.0);

        scene.load_model(&ctx, model("second", &[-1], 0)).unwrap();
        assert_ne!(scene.tlas().unwrap().accel().handle(), handle);
        assert_eq!(scene.tlas().unwrap().instance_count(), 3);
    }

    #[test]
    fn test_replaced_resources_released_after_retirement() {
        let (_backend, ctx) = context();
        let mut scene = Scene::new();
        scene.load_model(&ctx, model("first", &[-1], 0)).unwrap();
        scene.load_model(&ctx, model("second", &[-1], 0)).unwrap();

        // 旧的 TLAS、材质 buffer 以及它的描述符
        assert_eq!(scene.pending_release_count(), 3);
        ctx.queue().flush().unwrap();
        assert_eq!(scene.collect_released(&ctx), 3);
        assert_eq!(scene.pending_release_count(), 0);

        let allocated = ctx.descriptor_table().allocated();
        scene.release_all(&ctx);
        assert_eq!(ctx.descriptor_table().allocated(), allocated - 1);
    }

    #[test]
    fn test_invalid_model_leaves_scene_unchanged() {
        let (_backend, ctx) = context();
        let mut scene = Scene::new();
        scene.load_model(&ctx, model("first", &[-1], 0)).unwrap();

        let mut broken = model("broken", &[-1], 0);
        broken.meshes[0].indices.pop();
        let err = scene.load_model(&ctx, broken).unwrap_err();
        assert!(matches!(err, SceneError::InvalidMesh { .. }));
        assert!(err.is_recoverable());
        assert_eq!(scene.instance_count(), 1);
    }

    #[test]
    fn test_loader_errors_are_recoverable() {
        let (_backend, ctx) = context();
        let mut scene = Scene::new();

        let err = scene.load_model_from(&ctx, &FakeLoader, &PathBuf::from("model.gltf")).unwrap_err();
        assert!(matches!(err, SceneError::UnsupportedFormat { .. }));
        assert!(err.is_recoverable());

        assert_eq!(scene.load_model_from(&ctx, &FakeLoader, &PathBuf::from("model.fake")).unwrap(), 0);
        assert_eq!(scene.instance_count(), 1);
    }

    #[test]
    fn test_vertices_reach_device_memory() {
        let (backend, ctx) = context();
        let mut scene = Scene::new();
        let data = model("first", &[-1], 0);
        let expected = bytemuck::cast_slice::<Vertex, u8>(&data.meshes[0].vertices).to_vec();
        scene.load_model(&ctx, data).unwrap();

        let mesh = scene.meshes().next().unwrap();
        let bytes = backend.debug_read_buffer(mesh.vertex_buffer.handle());
        assert_eq!(&bytes[..expected.len()], expected.as_slice());
    }

    /// 两张贴图，材质 0 使用贴图 1 作为 albedo、贴图 0 作为 normal，材质 1 没有贴图
    fn textured_model(name: &str) -> ModelData {
        let mut data = model(name, &[0, 1], 2);
        data.textures = vec![
            TextureData::checker("checker", 4, 1, [255, 0, 0, 255], [0, 0, 255, 255]),
            TextureData {
                name: "gray".to_string(),
                width: 2,
                height: 1,
                format: TextureFormat::R8Unorm,
                pixels: vec![16, 240],
            },
        ];
        data.materials[0].albedo_index = 1;
        data.materials[0].normal_index = 0;
        data
    }

    #[test]
    fn test_texture_indices_remapped_to_descriptors() {
        let (backend, ctx) = context();
        let mut scene = Scene::new();
        // 第一个 model 占用一些描述符，贴图的 SRV 不会从 0 开始
        scene.load_model(&ctx, model("first", &[-1], 1)).unwrap();
        let source = textured_model("textured");
        scene.load_model(&ctx, source.clone()).unwrap();
        assert_eq!(scene.texture_count(), 2);

        let loaded = &scene.models()[1];
        let srvs = loaded.textures().iter().map(SceneTexture::srv).collect_vec();
        assert_ne!(srvs[0].index, srvs[1].index);
        assert!(srvs.iter().all(|srv| srv.index > 0));

        let material = loaded.materials()[0];
        assert_eq!(material.albedo_index, srvs[1].index as i32);
        assert_eq!(material.normal_index, srvs[0].index as i32);
        assert_eq!(material.metallic_roughness_index, -1);
        assert_eq!(loaded.materials()[1].texture_indices(), [-1; 4]);

        // GPU 上的材质 buffer 中是替换之后的 index，位于第一个 model 的材质之后
        let bytes = backend.debug_read_buffer(scene.material_buffer().unwrap().handle());
        let stride = std::mem::size_of::<MaterialData>();
        let gpu: MaterialData = bytemuck::pod_read_unaligned(&bytes[stride..2 * stride]);
        assert_eq!(gpu, material);

        let heap = ctx.descriptor_table().heap();
        for (texture, data) in loaded.textures().iter().zip(&source.textures) {
            let handle = texture.texture().handle();
            assert_eq!(texture.name(), data.name);
            assert_eq!(backend.texture_bytes(handle), data.pixels);
            assert_eq!(backend.texture_state(handle), TextureState::ShaderRead);
            assert_eq!(backend.descriptor_at(heap, texture.srv().index), Some(DescriptorView::SampledTexture(handle)));
        }
    }

    #[test]
    fn test_invalid_texture_reference_is_recoverable() {
        let (_backend, ctx) = context();
        let mut scene = Scene::new();
        scene.load_model(&ctx, model("first", &[-1], 0)).unwrap();
        let allocated = ctx.descriptor_table().allocated();

        let mut broken = textured_model("broken");
        broken.materials[1].emissive_index = 2;
        let err = scene.load_model(&ctx, broken).unwrap_err();
        assert!(matches!(err, SceneError::InvalidMaterial { material: 1, .. }));
        assert!(err.is_recoverable());

        let mut broken = textured_model("broken");
        broken.textures[1].pixels.push(0);
        let err = scene.load_model(&ctx, broken).unwrap_err();
        assert!(matches!(err, SceneError::InvalidTexture { .. }));
        assert!(err.is_recoverable());

        assert_eq!(scene.models().len(), 1);
        assert_eq!(ctx.descriptor_table().allocated(), allocated);
    }

    #[test]
    fn test_release_all_frees_texture_views() {
        let (_backend, ctx) = context();
        let mut scene = Scene::new();
        scene.load_model(&ctx, textured_model("textured")).unwrap();
        // 材质 SRV 以及两张贴图的 SRV
        assert_eq!(ctx.descriptor_table().allocated(), 3);

        ctx.queue().flush().unwrap();
        scene.release_all(&ctx);
        assert_eq!(ctx.descriptor_table().allocated(), 0);
        assert!(scene.models()[0].textures().is_empty());
    }
}
