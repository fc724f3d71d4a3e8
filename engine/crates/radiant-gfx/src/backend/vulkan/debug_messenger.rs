use std::ffi::CStr;

use ash::vk;

use crate::error::GfxResult;

/// validation layer 的消息输出到 log
pub struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    pub fn new(entry: &ash::Entry, instance: &ash::Instance) -> GfxResult<Self> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let messenger = unsafe { loader.create_debug_utils_messenger(&Self::create_info(), None)? };

        Ok(Self { loader, messenger })
    }

    /// 用于创建 debug messenger 的结构体
    ///
    /// 也可以挂在 InstanceCreateInfo 上，捕获 instance 创建过程中的消息
    pub fn create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
        vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR)
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vk_debug_callback))
    }

    /// 需要在 instance 销毁之前调用
    pub fn destroy(&self) {
        log::info!("destroying debug messenger");
        unsafe {
            self.loader.destroy_debug_utils_messenger(self.messenger, None);
        }
    }
}

/// debug messenger 的回调函数
///
/// # Safety
/// 由 validation layer 调用，p_callback_data 在调用期间有效
unsafe extern "system" fn vk_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let callback_data = unsafe { *p_callback_data };

    let msg = if callback_data.p_message.is_null() {
        std::borrow::Cow::from("")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };
    let format_msg = format_message(message_type, msg.as_ref());

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("{}", format_msg),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("{}", format_msg),
        _ => log::info!("{}", format_msg),
    };

    // 只有 layer developer 才需要返回 True
    vk::FALSE
}

/// 新版本的 validation layer 输出 json，其中 MainMessage 带有换行符，需要单独输出
fn format_message(message_type: vk::DebugUtilsMessageTypeFlagsEXT, msg: &str) -> String {
    let Ok(serde_json::Value::Object(mut obj)) = serde_json::from_str::<serde_json::Value>(msg) else {
        return format!("[{:?}]\n{}\n", message_type, msg);
    };

    let main_msg = obj.remove("MainMessage");
    let main_msg = main_msg.as_ref().and_then(|value| value.as_str()).unwrap_or_default();
    let rest = serde_json::to_string_pretty(&obj).unwrap_or_else(|_| msg.to_string());
    format!("[{:?}]\n{}\n{}\n", message_type, rest, main_msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_plain_message() {
        let formatted = format_message(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION, "plain text");
        assert!(formatted.contains("plain text"));
        assert!(formatted.contains("VALIDATION"));
    }

    #[test]
    fn test_format_json_message() {
        let msg = r#"{"MainMessage": "line one\nline two", "VUID": "VUID-1234"}"#;
        let formatted = format_message(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION, msg);
        assert!(formatted.contains("VUID-1234"));
        assert!(formatted.ends_with("line one\nline two\n"));
        assert!(!formatted.contains("MainMessage"));
    }
}
