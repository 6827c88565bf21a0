// Pixel formats recognized at the layer-buffer boundary (spec.md §6).
//
// Ordering matters: any variant at or after `YCbCr420Planar` is YUV for
// pipe-selection purposes (§4.3 rule 1), the same convention
// `res_manager.cpp::Acquire` uses (`format >= kFormatYCbCr420Planar`).

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(non_camel_case_types)]
pub enum PixelFormat {
    ARGB8888,
    RGBA8888,
    BGRA8888,
    XRGB8888,
    RGBX8888,
    BGRX8888,
    RGBA5551,
    RGBA4444,
    RGB888,
    BGR888,
    RGB565,
    BGR565,
    RGBA8888Ubwc,
    RGBX8888Ubwc,
    BGR565Ubwc,
    // Everything from here on is YUV.
    YCbCr420Planar,
    YCrCb420Planar,
    YCrCb420PlanarStride16,
    YCbCr420SemiPlanar,
    YCrCb420SemiPlanar,
    YCbCr420SemiPlanarVenus,
    YCrCb420SemiPlanarVenus,
    YCbCr422H1V2SemiPlanar,
    YCrCb422H1V2SemiPlanar,
    YCbCr422H2V1SemiPlanar,
    YCrCb422H2V1SemiPlanar,
    YCbCr422H2V1Packed,
    YCbCr420SPVenusUbwc,
    RGBA1010102,
    ARGB2101010,
    RGBX1010102,
    XRGB2101010,
    BGRA1010102,
    ABGR2101010,
    BGRX1010102,
    XBGR2101010,
    RGBA1010102Ubwc,
    RGBX1010102Ubwc,
    YCbCr420P010,
    YCbCr420TP10Ubwc,
    Invalid,
}

impl PixelFormat {
    /// True for any format that needs YUV-only (VIG) pipe treatment.
    pub fn is_yuv(&self) -> bool {
        *self >= PixelFormat::YCbCr420Planar && *self != PixelFormat::Invalid
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        PixelFormat::Invalid
    }
}
