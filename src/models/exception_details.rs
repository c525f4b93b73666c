use crate::models::{LimitedLenString1024, LimitedLenString32768};
use serde::{Deserialize, Serialize};

/// Exception details of the exception in a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExceptionDetails {
    /// In case exception is nested (outer exception contains inner one), the id and outerId
    /// properties are used to represent the nesting.
    pub(crate) id: i32,

    /// The value of outerId is a reference to an element in ExceptionDetails that represents the
    /// outer exception.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) outer_id: Option<i32>,

    /// Exception type name.
    pub(crate) type_name: LimitedLenString1024,

    /// Exception message.
    pub(crate) message: LimitedLenString32768,

    /// Indicates if full exception stack is provided in the exception.
    pub(crate) has_full_stack: bool,

    /// Text describing the stack. Either stack or parsedStack should have a value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) stack: Option<LimitedLenString32768>,

    /// List of stack frames. Either stack or parsedStack should have a value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) parsed_stack: Option<Vec<StackFrameData>>,
}

/// Stack frame information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StackFrameData {
    /// Level in the call stack. For the long stacks SDK may not report every function in a call
    /// stack.
    pub(crate) level: i32,

    /// Method name.
    pub(crate) method: LimitedLenString1024,

    /// Name of the assembly (dll, jar, crate, etc.) containing this function.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) assembly: Option<LimitedLenString1024>,

    /// File name or URL of the method implementation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) file_name: Option<LimitedLenString1024>,

    /// Line number of the code implementation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) line: Option<i32>,
}
