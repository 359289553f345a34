use std::{env, fs, path::PathBuf};

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").unwrap());

    // Vertex shader: consume the batched vertex stream (pos, color) and
    // apply the per-frame transform pushed by the renderer.
    // NOTE: Matches the Rust pipeline vertex layout:
    //   - binding 0, location 0: R32G32_SFLOAT (pos)
    //   - binding 0, location 1: R32G32B32A32_SFLOAT (color)
    let vs_src = r#"
#version 450
layout(location = 0) in vec2 inPos;
layout(location = 1) in vec4 inColor;

layout(push_constant) uniform Transform {
    mat4 proj;
    mat4 model;
} pc;

layout(location = 0) out vec4 vColor;

void main() {
    vColor = inColor;
    gl_Position = pc.proj * pc.model * vec4(inPos, 0.0, 1.0);
}
"#;

    // Fragment shader: just write the interpolated color.
    let fs_src = r#"
#version 450
layout(location = 0) in vec4 vColor;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = vColor;
}
"#;

    let comp = shaderc::Compiler::new().unwrap();
    let mut opts = shaderc::CompileOptions::new().unwrap();

    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_3 as u32,
    );
    // Mild optimization
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let vs_spv = comp
        .compile_into_spirv(
            vs_src,
            shaderc::ShaderKind::Vertex,
            "ui.vert",
            "main",
            Some(&opts),
        )
        .unwrap();

    let fs_spv = comp
        .compile_into_spirv(
            fs_src,
            shaderc::ShaderKind::Fragment,
            "ui.frag",
            "main",
            Some(&opts),
        )
        .unwrap();

    fs::write(out.join("ui.vert.spv"), vs_spv.as_binary_u8()).unwrap();
    fs::write(out.join("ui.frag.spv"), fs_spv.as_binary_u8()).unwrap();

    // Re-run if this file changes (inline sources live here)
    println!("cargo:rerun-if-changed=build.rs");
}
