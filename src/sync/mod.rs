pub(crate) mod cv;
pub(crate) use cv::CondVar;
