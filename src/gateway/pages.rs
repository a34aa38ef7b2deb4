//! Server-rendered HTML: registration form, login form and the user listing.
//!
//! Every user-supplied value goes through `html_escape` before it reaches
//! markup. Password digests are never rendered.

use crate::users::User;
use html_escape::{encode_double_quoted_attribute, encode_text};

fn base_style() -> &'static str {
    r#"
    * { margin: 0; padding: 0; box-sizing: border-box; }
    body {
        font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
        background: #f4f6f8; color: #222; padding: 32px 16px;
        display: flex; justify-content: center;
    }
    .card {
        background: #fff; border-radius: 12px; padding: 28px;
        width: 100%; max-width: 440px; box-shadow: 0 2px 16px rgba(0,0,0,0.07);
    }
    .card.wide { max-width: 960px; }
    h1 { font-size: 24px; margin-bottom: 20px; color: #16324f; }
    .form-group { margin-bottom: 14px; }
    .form-group label { display: block; font-size: 14px; font-weight: 500; margin-bottom: 5px; }
    .form-group input, .form-group select {
        width: 100%; padding: 10px 12px; border: 1.5px solid #d0d5da;
        border-radius: 8px; font-size: 15px;
    }
    .btn {
        width: 100%; padding: 12px; border: none; border-radius: 8px;
        background: #2f6fde; color: #fff; font-size: 15px; font-weight: 600; cursor: pointer;
    }
    .link { text-align: center; margin-top: 14px; font-size: 14px; }
    .link a { color: #2f6fde; text-decoration: none; }
    table { width: 100%; border-collapse: collapse; font-size: 14px; }
    th, td { text-align: left; padding: 8px 10px; border-bottom: 1px solid #e6e9ec; }
    th { background: #f0f3f6; }
    .empty { color: #777; font-size: 14px; }
    "#
}

fn page(title: &str, card_class: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="pt-BR"><head>
<meta charset="utf-8"><meta name="viewport" content="width=device-width,initial-scale=1">
<title>{title}</title>
<style>{style}</style>
</head><body>
<div class="{card_class}">
{body}
</div>
</body></html>"#,
        style = base_style(),
    )
}

/// `GET /`: the registration form.
pub fn render_registration_form() -> String {
    let body = r#"<h1>Cadastro de usuário</h1>
<form method="POST" action="/cadastro-usuario">
  <div class="form-group"><label for="nome">Nome</label><input id="nome" type="text" name="nome" required></div>
  <div class="form-group"><label for="email">Email</label><input id="email" type="email" name="email" required autocomplete="email"></div>
  <div class="form-group"><label for="cpf">CPF</label><input id="cpf" type="text" name="cpf"></div>
  <div class="form-group"><label for="idade">Idade</label><input id="idade" type="number" name="idade" min="0"></div>
  <div class="form-group"><label for="senha">Senha</label><input id="senha" type="password" name="senha" required autocomplete="new-password"></div>
  <div class="form-group"><label for="perfil">Perfil</label>
    <select id="perfil" name="perfil">
      <option value="usuario">Usuário</option>
      <option value="admin">Administrador</option>
    </select>
  </div>
  <button type="submit" class="btn">Cadastrar</button>
</form>
<div class="link">Já tem cadastro? <a href="/login">Entrar</a></div>"#;
    page("Cadastro de usuário", "card", body)
}

/// `GET /login`: the login form.
pub fn render_login_form() -> String {
    let body = r#"<h1>Entrar</h1>
<form method="POST" action="/login">
  <div class="form-group"><label for="email">Email</label><input id="email" type="email" name="email" required autocomplete="username"></div>
  <div class="form-group"><label for="senha">Senha</label><input id="senha" type="password" name="senha" required autocomplete="current-password"></div>
  <button type="submit" class="btn">Entrar</button>
</form>
<div class="link">Não tem cadastro? <a href="/">Cadastre-se</a></div>"#;
    page("Entrar", "card", body)
}

/// `GET /usuarios`: table of registered users, without password digests.
pub fn render_users_page(users: &[User]) -> String {
    let listing = if users.is_empty() {
        r#"<p class="empty">Nenhum usuário cadastrado.</p>"#.to_owned()
    } else {
        let rows: String = users.iter().map(render_user_row).collect();
        format!(
            r#"<table>
<thead><tr><th>Nome</th><th>Email</th><th>CPF</th><th>Idade</th><th>Perfil</th><th>ID</th></tr></thead>
<tbody>
{rows}</tbody>
</table>"#
        )
    };

    let body = format!(
        r#"<h1>Usuários cadastrados ({count})</h1>
{listing}
<div class="link"><a href="/logout">Sair</a></div>"#,
        count = users.len(),
    );
    page("Usuários", "card wide", &body)
}

fn render_user_row(user: &User) -> String {
    format!(
        "<tr data-id=\"{id_attr}\"><td>{nome}</td><td>{email}</td><td>{cpf}</td><td>{idade}</td><td>{perfil}</td><td><code>{id}</code></td></tr>\n",
        id_attr = encode_double_quoted_attribute(&user.id),
        nome = encode_text(&user.nome),
        email = encode_text(&user.email),
        cpf = encode_text(&user.cpf),
        idade = encode_text(&user.idade),
        perfil = encode_text(&user.perfil),
        id = encode_text(&user.id),
    )
}
