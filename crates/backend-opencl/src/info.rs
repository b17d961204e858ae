//! Parsing of the string-valued device and program queries.

/// `CL_PROGRAM_KERNEL_NAMES` is a semicolon-separated list.
pub fn split_kernel_names(names: &str) -> Vec<String> {
    names
        .split(';')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// `CL_DEVICE_EXTENSIONS` is a space-separated list.
pub fn split_extensions(extensions: &str) -> Vec<String> {
    extensions.split_whitespace().map(str::to_string).collect()
}

pub fn has_fp16(extensions: &[String]) -> bool {
    extensions.iter().any(|ext| ext == "cl_khr_fp16")
}

/// Drivers pad some strings with NULs and spaces.
pub fn clean(value: &str) -> String {
    value.trim_matches(|c: char| c == '\0' || c.is_whitespace()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_names_ignore_empty_entries() {
        assert_eq!(
            split_kernel_names("benchmark_global;benchmark_local; benchmark_private;"),
            ["benchmark_global", "benchmark_local", "benchmark_private"]
        );
        assert!(split_kernel_names("").is_empty());
    }

    #[test]
    fn fp16_comes_from_the_extension_list() {
        let extensions = split_extensions("cl_khr_global_int32_base_atomics  cl_khr_fp16 cl_khr_fp64");
        assert_eq!(extensions.len(), 3);
        assert!(has_fp16(&extensions));
        assert!(!has_fp16(&split_extensions("cl_khr_fp64")));
    }

    #[test]
    fn driver_strings_are_trimmed() {
        assert_eq!(clean("  NVIDIA CUDA\0"), "NVIDIA CUDA");
    }
}
