//! Full-screen textured quad.

use std::{
    ffi::{c_char, CStr, CString},
    ptr,
};

use smithay::{
    backend::{
        egl::{self, ffi::egl::types::EGLImage},
        renderer::gles::ffi::{
            self,
            types::{GLenum, GLint, GLuint},
        },
    },
    reexports::wayland_server::protocol::wl_shm,
};
use tracing::info;

use super::SetupError;
use crate::backend::FrameError;

const VERTEX_SHADER: &str = "\
attribute vec4 vPosition;
attribute vec2 aTexCoord;
varying vec2 vTexCoord;
void main() {
   gl_Position = vPosition;
   vTexCoord = aTexCoord;
}
";

const FRAGMENT_SHADER: &str = "\
precision mediump float;
uniform sampler2D u_texture;
varying vec2 vTexCoord;
void main() {
   gl_FragColor = texture2D(u_texture, vTexCoord);
}
";

#[rustfmt::skip]
const VERTICES: [f32; 12] = [
    -1.0,  1.0, 0.0,
     1.0,  1.0, 0.0,
    -1.0, -1.0, 0.0,
     1.0, -1.0, 0.0,
];

#[rustfmt::skip]
const TEX_COORDS: [f32; 8] = [
    0.0, 0.0,
    1.0, 0.0,
    0.0, 1.0,
    1.0, 1.0,
];

const POSITION_ATTRIB: GLuint = 0;
const TEX_COORD_ATTRIB: GLuint = 1;

/// Shader program and the single texture client content is bound to.
///
/// Every call requires the owning context to be current.
pub struct QuadProgram {
    gl: ffi::Gles2,
    program: GLuint,
    texture: GLuint,
}

impl std::fmt::Debug for QuadProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuadProgram")
            .field("program", &self.program)
            .field("texture", &self.texture)
            .finish()
    }
}

impl QuadProgram {
    /// # Safety
    ///
    /// The EGL context this program is used with must be current on this
    /// thread.
    pub unsafe fn new(width: u32, height: u32) -> Result<Self, SetupError> {
        let gl = ffi::Gles2::load_with(|s| egl::get_proc_address(s) as *const _);

        let ext_ptr = gl.GetString(ffi::EXTENSIONS) as *const c_char;
        if ext_ptr.is_null() {
            return Err(SetupError::Gl("no GL extension string".into()));
        }
        let exts = CStr::from_ptr(ext_ptr).to_string_lossy();
        if !exts.split(' ').any(|ext| ext == "GL_OES_EGL_image") {
            return Err(SetupError::MissingExtension("GL_OES_EGL_image"));
        }
        info!(
            "GL Renderer: {:?}",
            CStr::from_ptr(gl.GetString(ffi::RENDERER) as *const c_char)
        );

        let vertex = compile(&gl, ffi::VERTEX_SHADER, VERTEX_SHADER)?;
        let fragment = compile(&gl, ffi::FRAGMENT_SHADER, FRAGMENT_SHADER)?;

        let program = gl.CreateProgram();
        gl.AttachShader(program, vertex);
        gl.AttachShader(program, fragment);
        let position = CString::new("vPosition").map_err(|e| SetupError::Gl(e.to_string()))?;
        let tex_coord = CString::new("aTexCoord").map_err(|e| SetupError::Gl(e.to_string()))?;
        gl.BindAttribLocation(program, POSITION_ATTRIB, position.as_ptr());
        gl.BindAttribLocation(program, TEX_COORD_ATTRIB, tex_coord.as_ptr());
        gl.LinkProgram(program);
        gl.DeleteShader(vertex);
        gl.DeleteShader(fragment);

        let mut linked: GLint = 0;
        gl.GetProgramiv(program, ffi::LINK_STATUS, &mut linked);
        if linked == 0 {
            gl.DeleteProgram(program);
            return Err(SetupError::Gl("failed to link quad program".into()));
        }
        gl.UseProgram(program);

        let sampler = CString::new("u_texture").map_err(|e| SetupError::Gl(e.to_string()))?;
        let sampler = gl.GetUniformLocation(program, sampler.as_ptr());
        gl.Uniform1i(sampler, 0);

        let mut texture: GLuint = 0;
        gl.GenTextures(1, &mut texture);
        gl.ActiveTexture(ffi::TEXTURE0);
        gl.BindTexture(ffi::TEXTURE_2D, texture);
        gl.TexParameteri(ffi::TEXTURE_2D, ffi::TEXTURE_MIN_FILTER, ffi::LINEAR as GLint);
        gl.TexParameteri(ffi::TEXTURE_2D, ffi::TEXTURE_MAG_FILTER, ffi::LINEAR as GLint);
        gl.TexParameteri(ffi::TEXTURE_2D, ffi::TEXTURE_WRAP_S, ffi::CLAMP_TO_EDGE as GLint);
        gl.TexParameteri(ffi::TEXTURE_2D, ffi::TEXTURE_WRAP_T, ffi::CLAMP_TO_EDGE as GLint);

        gl.Viewport(0, 0, width as GLint, height as GLint);

        Ok(Self {
            gl,
            program,
            texture,
        })
    }

    /// # Safety
    ///
    /// Context current, `image` alive for the duration of the call.
    pub unsafe fn bind_image(&self, image: EGLImage) {
        self.gl.BindTexture(ffi::TEXTURE_2D, self.texture);
        self.gl.EGLImageTargetTexture2DOES(ffi::TEXTURE_2D, image);
    }

    /// Uploads shm pixels into the texture.
    ///
    /// # Safety
    ///
    /// Context current, `pixels` valid for `len` bytes.
    pub unsafe fn upload_shm(
        &self,
        pixels: *const u8,
        len: usize,
        data: smithay::wayland::shm::BufferData,
    ) -> Result<(), FrameError> {
        match data.format {
            wl_shm::Format::Argb8888 | wl_shm::Format::Xrgb8888 => {}
            other => return Err(FrameError::Import(format!("unsupported shm format {other:?}"))),
        }
        let (offset, width, height, stride) = (
            data.offset as usize,
            data.width as usize,
            data.height as usize,
            data.stride as usize,
        );
        if stride < width * 4 || offset + stride * height > len {
            return Err(FrameError::Import("shm buffer out of pool bounds".into()));
        }

        let gl = &self.gl;
        gl.BindTexture(ffi::TEXTURE_2D, self.texture);
        gl.PixelStorei(ffi::UNPACK_ALIGNMENT, 4);
        gl.TexImage2D(
            ffi::TEXTURE_2D,
            0,
            ffi::BGRA_EXT as GLint,
            width as GLint,
            height as GLint,
            0,
            ffi::BGRA_EXT,
            ffi::UNSIGNED_BYTE,
            if stride == width * 4 {
                pixels.add(offset) as *const _
            } else {
                ptr::null()
            },
        );
        if stride != width * 4 {
            for row in 0..height {
                gl.TexSubImage2D(
                    ffi::TEXTURE_2D,
                    0,
                    0,
                    row as GLint,
                    width as GLint,
                    1,
                    ffi::BGRA_EXT,
                    ffi::UNSIGNED_BYTE,
                    pixels.add(offset + row * stride) as *const _,
                );
            }
        }
        Ok(())
    }

    /// # Safety
    ///
    /// Context current.
    pub unsafe fn clear(&self, color: [f32; 4]) {
        self.gl.ClearColor(color[0], color[1], color[2], color[3]);
        self.gl.Clear(ffi::COLOR_BUFFER_BIT);
    }

    /// Clears and draws the bound texture over the whole viewport.
    ///
    /// # Safety
    ///
    /// Context current.
    pub unsafe fn draw(&self, clear_color: [f32; 4]) -> Result<(), FrameError> {
        let gl = &self.gl;
        self.clear(clear_color);
        gl.UseProgram(self.program);
        gl.ActiveTexture(ffi::TEXTURE0);
        gl.BindTexture(ffi::TEXTURE_2D, self.texture);

        gl.VertexAttribPointer(
            POSITION_ATTRIB,
            3,
            ffi::FLOAT,
            ffi::FALSE,
            0,
            VERTICES.as_ptr() as *const _,
        );
        gl.VertexAttribPointer(
            TEX_COORD_ATTRIB,
            2,
            ffi::FLOAT,
            ffi::FALSE,
            0,
            TEX_COORDS.as_ptr() as *const _,
        );
        gl.EnableVertexAttribArray(POSITION_ATTRIB);
        gl.EnableVertexAttribArray(TEX_COORD_ATTRIB);
        gl.DrawArrays(ffi::TRIANGLE_STRIP, 0, 4);
        gl.DisableVertexAttribArray(POSITION_ATTRIB);
        gl.DisableVertexAttribArray(TEX_COORD_ATTRIB);

        match gl.GetError() {
            ffi::NO_ERROR => Ok(()),
            err => Err(FrameError::Render(format!("GL error {err:#x}"))),
        }
    }

    /// # Safety
    ///
    /// Context current. The program must not be used afterwards.
    pub unsafe fn destroy(&self) {
        self.gl.DeleteTextures(1, &self.texture);
        self.gl.DeleteProgram(self.program);
    }
}

unsafe fn compile(gl: &ffi::Gles2, kind: GLenum, source: &str) -> Result<GLuint, SetupError> {
    let shader = gl.CreateShader(kind);
    let source = CString::new(source).map_err(|e| SetupError::Gl(e.to_string()))?;
    gl.ShaderSource(shader, 1, &source.as_ptr(), ptr::null());
    gl.CompileShader(shader);

    let mut compiled: GLint = 0;
    gl.GetShaderiv(shader, ffi::COMPILE_STATUS, &mut compiled);
    if compiled == 0 {
        let mut log = vec![0u8; 512];
        let mut len = 0;
        gl.GetShaderInfoLog(shader, log.len() as i32, &mut len, log.as_mut_ptr() as *mut _);
        log.truncate(len.max(0) as usize);
        gl.DeleteShader(shader);
        return Err(SetupError::Gl(format!(
            "shader compilation failed: {}",
            String::from_utf8_lossy(&log)
        )));
    }
    Ok(shader)
}
