pub struct UserCreateRequest {
    pub email: String,
    pub name: String,
}
